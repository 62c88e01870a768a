//! Shared UI icons, with plain-text fallbacks for terminals without emoji.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

// Workflow indicators
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[||]");
pub static GATE: Emoji<'_, '_> = Emoji("🚧 ", "[GATE]");
pub static PLAN: Emoji<'_, '_> = Emoji("📋 ", "[PLAN]");
pub static HISTORY: Emoji<'_, '_> = Emoji("🗄️  ", "[H]");
