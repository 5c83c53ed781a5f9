use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use anyhow::{bail, Context};
use clap::Parser;
use tracing::debug;
use unwind_dns_domain::FrontendConfig;
use unwind_dns_infrastructure::{sandbox, Frontend};

mod bootstrap;

/// Descriptor the parent leaves the main channel on.
const MAIN_CHANNEL_FD: RawFd = 3;

#[derive(Parser)]
#[command(name = "unwind-dns")]
#[command(version)]
#[command(about = "Privilege-separated validating DNS resolver - frontend process")]
struct Cli {
    /// Stay attached to the supervisor without dropping privileges
    /// (development runs as a non-root user)
    #[arg(short = 'd', long)]
    debug: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Unprivileged user whose home directory becomes the chroot
    #[arg(long, default_value = sandbox::FRONTEND_USER)]
    user: String,

    /// Descriptor of the channel to the supervisor
    #[arg(long, default_value_t = MAIN_CHANNEL_FD)]
    ipc_fd: RawFd,

    /// Configuration file for standalone debug runs; the supervisor
    /// replaces these settings over the main channel
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bootstrap::init_logging(cli.verbose);

    sandbox::ignore_hangup_signals();

    if !cli.debug {
        sandbox::drop_privileges(&cli.user).context("can't drop privileges")?;
    } else {
        debug!("debug mode: keeping invoking user");
    }
    sandbox::restrict_capabilities().context("can't restrict privileges")?;

    let config = match cli.config.as_deref() {
        Some(path) => FrontendConfig::from_file(path)?,
        None => FrontendConfig::default(),
    };

    if unsafe { libc::fcntl(cli.ipc_fd, libc::F_GETFD) } == -1 {
        bail!("no channel from supervisor on fd {}", cli.ipc_fd);
    }
    // Ours alone from here on; the channel owns it.
    let main_fd = unsafe { OwnedFd::from_raw_fd(cli.ipc_fd) };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("runtime setup failed")?;

    runtime.block_on(async move {
        let mut frontend = Frontend::new(main_fd)?.with_config(config);
        frontend.run().await
    })?;

    Ok(())
}
