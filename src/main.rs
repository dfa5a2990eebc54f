use clap::Parser;

use race_relay::Instance;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// UDP address to listen on
    #[clap(default_value = "0.0.0.0:9998")]
    addr: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut instance = Instance::bind(args.addr.as_str())?;
    log::info!("relay listening on {}", instance.local_addr());

    instance.run()?;
    Ok(())
}
