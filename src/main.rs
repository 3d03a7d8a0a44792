use std::path::PathBuf;

use bh_template_gen::{config, stack, writer};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let config_path = PathBuf::from("./bh_config.yaml");
    let config = config::load(&config_path)?;

    let template = stack::Stack::new(&config).generate_template()?;
    writer::write(&config.output, &template)?;

    println!("Wrote to {}", config.output.location.display());
    return Ok(());
}
