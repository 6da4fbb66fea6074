//! Shared UI icons, with plain fallbacks for terminals without emoji.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "[URL]");
pub static PALETTE: Emoji<'_, '_> = Emoji("🎨 ", "[DESIGN]");
pub static WRENCH: Emoji<'_, '_> = Emoji("🔧 ", "[FIX]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "[DEPLOY]");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
