//! Interactive shell: one command per stdin line, parsed with clap.

use std::io::{IsTerminal, Write};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use nwmng_core::{Command, Controller};

use crate::cli::{ShellCommand, ShellLine};
use crate::error::CliError;
use crate::output;

enum Flow {
    Continue,
    Quit,
}

/// Read commands until `quit` or end of input.
pub async fn run(ctrl: &Controller) -> Result<(), CliError> {
    let interactive = std::io::stdin().is_terminal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if interactive {
            print!("nwmng> ");
            let _ = std::io::stdout().flush();
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        let parsed = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed,
            Err(e) => {
                let _ = e.print();
                continue;
            }
        };
        tracing::debug!(command = ?parsed.command, "shell command");
        match execute(ctrl, parsed.command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => eprintln!("{:?}", miette::Report::new(e)),
        }
    }
    Ok(())
}

async fn execute(ctrl: &Controller, cmd: ShellCommand) -> Result<Flow, CliError> {
    let command = match cmd {
        ShellCommand::List => {
            output::print_output(&output::render_nodes(&ctrl.nodes().latest()));
            output::print_output(&output::render_devices(
                &ctrl.unprovisioned().latest(),
                "no devices waiting for provisioning",
            ));
            return Ok(Flow::Continue);
        }
        ShellCommand::Backlog => {
            output::print_output(&output::render_devices(&ctrl.backlog().latest(), "backlog is empty"));
            return Ok(Flow::Continue);
        }
        ShellCommand::Stats => {
            let stats = *ctrl.stats().borrow();
            output::print_output(&output::render_stats(&stats));
            return Ok(Flow::Continue);
        }
        ShellCommand::Restart => {
            ctrl.restart().await?;
            output::print_output("worker restarted");
            return Ok(Flow::Continue);
        }
        ShellCommand::Quit => return Ok(Flow::Quit),
        ShellCommand::Promote { uuid } => Command::Promote { uuid },
        ShellCommand::Blacklist { uuid } => Command::Blacklist { uuid },
        ShellCommand::Remove { address } => Command::Remove { address },
        ShellCommand::Free { state } => Command::SetFreeMode(state.is_on()),
        ShellCommand::Scan { state } => Command::SetScan(state.is_on()),
    };
    ctrl.execute(command).await?;
    output::print_output("ok");
    Ok(Flow::Continue)
}
