/// Command-line surface of the companion tool
pub mod args;

pub use args::{AddArgs, Cli, Commands, DriveArgs};

use std::sync::Arc;

use crate::config::DriveConfig;
use crate::driver::AcmeDriver;
use crate::error::Result;
use crate::registry::MdRegistry;
use crate::store::FileStore;
use crate::types::{CancelToken, ManagedDomain};

/// Run the parsed command. Returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let store = Arc::new(FileStore::new(&cli.store_dir));
    let config = match cli.config.as_deref() {
        Some(path) => match DriveConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return 1;
            }
        },
        None => DriveConfig::default(),
    };

    let result = match cli.command {
        Commands::Add(args) => cmd_add(&MdRegistry::new(store), args).await,
        Commands::List => cmd_list(&MdRegistry::new(store)).await,
        Commands::Drive(args) => cmd_drive(AcmeDriver::new(store, config), args).await,
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}

async fn cmd_add(registry: &MdRegistry, args: AddArgs) -> Result<()> {
    let mut md = ManagedDomain::new(args.domains, args.ca_url)?;
    md.contacts = args.contacts;
    md.ca_agreement = args.agreement;
    registry.add(&md).await?;
    print_md(&md);
    Ok(())
}

async fn cmd_list(registry: &MdRegistry) -> Result<()> {
    for md in registry.list().await? {
        print_md(&md);
    }
    Ok(())
}

async fn cmd_drive(driver: AcmeDriver, args: DriveArgs) -> Result<()> {
    let state = driver.run(&args.name, &CancelToken::new()).await?;
    println!("{}: {}", args.name, state);
    Ok(())
}

fn print_md(md: &ManagedDomain) {
    println!(
        "{} [{}]: {} ({})",
        md.name,
        md.state,
        md.domains.join(" "),
        md.ca_url
    );
}
