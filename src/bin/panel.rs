use clap::Parser;
use padlink::{
    load_action_sets, serial::SerialConnector, ActionGroup, ActionSet, Command, Failure, GroupId,
    Link, LinkConfig, Observer, Snapshot,
};
use std::{error::Error, fs};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port path (e.g. /dev/ttyACM0)
    serial_port: String,

    /// Action set definitions (JSON file)
    #[arg(short, long)]
    actions: Option<String>,
}

struct Console;

impl Observer for Console {
    fn connection_changed(&self, snapshot: Snapshot) {
        println!(
            "link: {}",
            if snapshot.connected { "alive" } else { "offline" }
        );
    }

    fn command_acknowledged(&self, command: Command, _snapshot: Snapshot) {
        println!("ok: {command} acknowledged");
    }

    fn command_failed(&self, command: Command, failure: Failure, _snapshot: Snapshot) {
        println!("failed: {command}: {failure}");
    }

    fn arm_status_changed(&self, snapshot: Snapshot) {
        println!("armed: {}", snapshot.armed);
    }
}

/// Resolves a group by name across all sets, falling back to a raw id.
fn find_group(sets: &[ActionSet], key: &str) -> Option<ActionGroup> {
    if let Some(group) = sets.iter().find_map(|set| set.group(key)) {
        return Some(group.clone());
    }

    let id = key.parse().ok()?;

    Some(ActionGroup {
        name: format!("group {id}"),
        id: GroupId(id),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();

    let sets = match &args.actions {
        Some(path) => load_action_sets(&fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    let link = Link::open(
        SerialConnector::new(args.serial_port.as_str()),
        Console,
        LinkConfig::default(),
    );

    println!("Commands: arm, disarm, fire <group>, status, groups, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

        let res = match verb {
            "" => continue,
            "arm" => link.arm(),
            "disarm" => link.disarm(),
            "fire" => match find_group(&sets, rest.trim()) {
                Some(group) => link.fire_action_group(&group),
                None => {
                    println!("unknown action group: {rest}");
                    continue;
                }
            },
            "status" => {
                println!(
                    "connection: {}, armed: {}, decode anomalies: {}",
                    link.connection_state(),
                    link.armed_status(),
                    link.decode_anomalies()
                );
                continue;
            }
            "groups" => {
                for set in &sets {
                    println!("{}:", set.name);

                    for group in &set.groups {
                        println!("  {} (id {})", group.name, group.id);
                    }
                }
                continue;
            }
            "quit" | "q" => break,
            _ => {
                println!("unknown command: {verb}");
                continue;
            }
        };

        match res {
            Ok(id) => println!("submitted {id}"),
            Err(err) => println!("rejected: {err}"),
        }
    }

    Ok(())
}
