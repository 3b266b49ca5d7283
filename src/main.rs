use clap::{ArgAction, Parser};
use cview_mscif::config::Config;
use cview_mscif::io;
use cview_mscif::utils::{logger, report};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cview-mscif")]
#[command(about = "Reconstruct crystal structures from CIF, mmCIF and msCIF files", long_about = None)]
struct Args {
    /// Input CIF files
    #[arg(required_unless_present = "save_config")]
    paths: Vec<String>,

    /// Reader filter, e.g. "MOLECUL;CONF 2;MODAXES=xz"
    #[arg(short, long)]
    filter: Option<String>,

    /// Write FILE.json next to each input instead of printing a summary
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Save the current settings to the config file
    #[arg(long, action = ArgAction::SetTrue)]
    save_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (config, msg) = Config::load();
    if let Err(e) = logger::init(config.level_filter()) {
        eprintln!("logger: {}", e);
    }
    log::debug!("{}", msg);

    if args.save_config {
        log::info!("{}", config.save());
    }

    let opts = config.reader_options(args.filter.as_deref());
    let mut failed = false;
    for (path, result) in io::load_batch(&args.paths, &opts) {
        match result {
            Ok(collection) if args.json => {
                let out = format!("{}.json", path);
                match io::save_json(&out, &collection) {
                    Ok(()) => log::info!("wrote {}", out),
                    Err(e) => {
                        log::error!("{}: {}", out, e);
                        failed = true;
                    }
                }
            }
            Ok(collection) => print!("{}", report::collection_summary(&collection, &path)),
            Err(e) => {
                log::error!("{}: {}", path, e);
                failed = true;
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
