//! Kill-port command - free an occupied port.

use anyhow::{bail, Result};
use projax_core::{ConflictResolver, DenyAll, PortProbe, PortProber};

use super::{is_interactive, TtyPrompt};

pub async fn run(port: u16, force: bool) -> Result<()> {
    let probe = PortProbe::new();

    if !probe.is_port_in_use(port).await {
        println!("Port {} is free.", port);
        return Ok(());
    }

    let resolver = ConflictResolver::new(&probe);
    let freed = if is_interactive() {
        resolver.resolve(port, "kill-port", force, &TtyPrompt).await?
    } else {
        resolver.resolve(port, "kill-port", force, &DenyAll).await?
    };

    if freed {
        println!("Port {} freed.", port);
        Ok(())
    } else {
        bail!("port {} was not freed", port);
    }
}
