use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[macro_use]
extern crate log;

use env_logger::Env;
use structopt::StructOpt;

use rust_ofp_firewall::config::{BroadcastPolicy, ControllerConfig};
use rust_ofp_firewall::console;
use rust_ofp_firewall::controller::Controller;
use rust_ofp_firewall::firewall::FirewallRegistry;
use rust_ofp_firewall::ofp_controller::{LoggingConnection, OfpController};

/// Upper bound on the number of emulated switches.
const MAX_SWITCHES: u64 = 1024;

#[derive(StructOpt, Debug)]
#[structopt(name = "rust_ofp_firewall_console")]
/// Learning switch and firewall console over emulated OpenFlow switches
struct Opt {
    #[structopt(long, default_value = "10", env = "OFW_IDLE_TIMEOUT")]
    /// idle timeout of learned flows in seconds (0 never expires)
    idle_timeout: u16,
    #[structopt(long, default_value = "30", env = "OFW_HARD_TIMEOUT")]
    /// hard timeout of learned flows in seconds (0 never expires)
    hard_timeout: u16,
    #[structopt(long, default_value = "32768", env = "OFW_FORWARD_PRIORITY")]
    /// priority of learned forwarding flows
    forward_priority: u16,
    #[structopt(long, default_value = "65535", env = "OFW_BLOCK_PRIORITY")]
    /// priority of firewall block flows
    block_priority: u16,
    #[structopt(long, default_value = "skip", env = "OFW_BROADCAST_POLICY")]
    /// what a rule sent to all switches does on a duplicate (skip|stop)
    broadcast_policy: BroadcastPolicy,
    #[structopt(short, long, default_value = "3", env = "OFW_SWITCHES")]
    /// number of emulated switches
    switches: u64,
}

impl Opt {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
            forward_priority: self.forward_priority,
            block_priority: self.block_priority,
            broadcast_policy: self.broadcast_policy,
        }
    }

    fn switch_count(&self) -> u64 {
        if self.switches > MAX_SWITCHES {
            warn!("{} switches requested, emulating {}", self.switches, MAX_SWITCHES);
        }
        self.switches.min(MAX_SWITCHES)
    }
}

fn main() {
    let env = Env::default()
        .filter_or("OFW_LOG_LEVEL", "info")
        .write_style_or("OFW_LOG_STYLE", "always");
    env_logger::init_from_env(env);

    let args = Opt::from_args();
    debug!("args: {:?}", args);

    let mut ctl = Controller::new(args.controller_config(), FirewallRegistry::new());
    for dpid in 1..=args.switch_count() {
        ctl.switch_connected(Arc::new(LoggingConnection::new(dpid)));
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("ofw> ");
        if stdout.flush().is_err() {
            break;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => (),
            Err(e) => {
                error!("{}", e);
                break;
            }
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        match console::run_line(&mut ctl, line) {
            Ok(out) => println!("{}", out),
            Err(e) => println!("error: {}", e),
        }
    }
}
