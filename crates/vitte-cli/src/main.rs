//! vitte-cli/src/main.rs
//!
//! Point d’entrée du binaire `vitte`. Prépare l’environnement (logs,
//! rapports d’erreurs) puis délègue à `vitte_cli::run()`, qui rend le code
//! de sortie du contrat CLI : 0/65/70/74.

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("⚠️ Impossible d'initialiser color-eyre: {e}");
    }
    env_logger::init();

    let exit = vitte_cli::run();
    std::process::exit(exit.code());
}
