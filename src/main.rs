use clap::Parser;
use objcache::demos::{inspect, simulation};
use objcache::settings::{CliArgs, OperationMode};

fn main() {
    env_logger::init();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    let result = match &args.operation_mode {
        OperationMode::Simulate {
            objects,
            frames,
            seed,
            region_handle,
            camera,
        } => {
            let options = simulation::SimulationOptions {
                objects: *objects,
                frames: *frames,
                seed: seed.unwrap_or_else(rand::random),
                region_handle: *region_handle,
                camera: (*camera).into(),
            };
            simulation::run(&args.cache, &options).map(|_| ())
        }
        OperationMode::Inspect { file } => inspect::inspect_file(file),
    };

    if let Err(err) = result {
        log::error!("{:#}", err);
        std::process::exit(1);
    }
}
