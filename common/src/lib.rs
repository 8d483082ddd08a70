pub mod shutdown;

use owo_colors::OwoColorize;

/// Prints the process banner. Called once at the top of every binary in
/// this workspace before it touches the Kubernetes API.
pub fn init() {
    println!(
        "{} {}",
        "breakglass-operator".bold(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
}

/// Emitted once the operator has completed its first successful
/// reconciliation pass, giving an external readiness probe something
/// concrete to key off of.
pub fn signal_ready() {
    println!("{}", "ready".green());
}
