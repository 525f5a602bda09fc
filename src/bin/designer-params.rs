use clap::Parser;
use designer::DesignerParams;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Args {
    /// path to the designer parameter file to write
    parameter_file: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match DesignerParams::default().to_file(&args.parameter_file) {
        Ok(filename) => println!("wrote default parameter file to {}", filename.display()),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}
