use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", ROCKET, style(step).bold());
}

/// Logo shaded top to bottom through the 256-colour blue/cyan ramp.
pub fn print_banner() {
    const LOGO: [&str; 6] = [
        "       _            _           _   ",
        " _ __ | |_   _  __ _| |__   ___ | |_ ",
        "| '_ \\| | | | |/ _` | '_ \\ / _ \\| __|",
        "| |_) | | |_| | (_| | |_) | (_) | |_ ",
        "| .__/|_|\\__,_|\\__, |_.__/ \\___/ \\__|",
        "|_|            |___/                 ",
    ];
    const SHADES: [u8; 6] = [105, 99, 63, 69, 75, 45];

    println!();
    for (line, shade) in LOGO.iter().zip(SHADES) {
        println!("{}", style(line).color256(shade).bold());
    }
    println!(
        "{}\n",
        style("Scheduled and interactive bot plugins.").color256(45)
    );
}

/// A titled block of `command  description` lines for help output.
pub struct GuideSection {
    title: String,
    commands: Vec<(String, String)>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            commands: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.commands.push((name.to_string(), description.to_string()));
        self
    }

    pub fn print(&self) {
        println!(" {}", style(&self.title).bold().underlined());
        let width = self.commands.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
        for (name, description) in &self.commands {
            let padded = format!("{:width$}", name, width = width);
            println!("   {}  {}", style(padded).green(), style(description).dim());
        }
        println!();
    }
}
