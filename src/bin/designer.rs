use clap::Parser;
use designer::{designer_exec, DesignerArgs, DesignerParams};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = DesignerArgs::parse();

    let params = match &args.config {
        Some(file) => DesignerParams::from_file(file),
        None => Ok(DesignerParams::default()),
    };
    let result = params.and_then(|params| designer_exec(&args, &params));
    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
