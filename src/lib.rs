mod autohack;
mod batch;
mod config;
mod controller;
mod dispatch;
mod error;
mod event_pool;
mod host;
mod inventory;
mod logging;
mod machine;
mod netscript;
mod optimize;
mod prep;
mod scan;
mod script_deploy;
mod store;
mod target;
mod utils;

#[cfg(test)]
mod testing;

use clap::{
    error::ErrorKind::DisplayHelp,
    Parser,
    Subcommand,
};
use js_sys::Array;
use wasm_bindgen::prelude::*;

use crate::{
    autohack::HackMode,
    inventory::{
        NodeInventory,
        ROOT,
    },
    netscript::{
        NsWrapper,
        NS,
    },
    optimize::OptimizeMode,
    scan::ScanMode,
};

#[wasm_bindgen]
pub async fn execute_command(
    ns: &NS,
    args: Array,
) {
    let ns = NsWrapper::new(ns);

    let mut strargs = vec!["run your_script.js".to_owned()];
    let strargs_iter = args.iter().filter_map(|a| a.as_string());
    strargs.extend(strargs_iter);

    // if the message was matched, process the message
    let app = match App::try_parse_from(strargs) {
        Err(e) if e.kind() == DisplayHelp => {
            let error_msg = format!("\n{}", e.render());
            ns.tprint(&error_msg);
            return;
        },

        Err(e) => {
            ns.tprint(&format!("unable to process message:\n{}", e));
            return;
        },

        Ok(app) => app,
    };

    logging::init(&app.log_level);
    ns.disable_log("ALL");

    match app.mode {
        AppMode::Scan(scan_mode) => ns.tprint(&scan_mode.execute(&ns)),

        AppMode::Hack(hack_mode) => autohack::auto_hack(&ns, &hack_mode).await,

        AppMode::Optimize(optimize_mode) => {
            optimize::optimize(&ns, &optimize_mode).await
        },

        AppMode::KillAll => {
            let mut inventory = NodeInventory::new(ROOT, 0.);
            inventory.refresh(&ns);
            let killed = inventory.kill_all(&ns);
            ns.tprint(&format!("killed every process on {} nodes", killed));
        },
    }

    logging::flush_to(&ns);
}

#[derive(Parser)]
struct App {
    /// Log filter, e.g. `info` or `bitbatch=debug`.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    mode: AppMode,
}

#[derive(Subcommand)]
enum AppMode {
    /// Map the network, optionally gaining root on the way.
    Scan(ScanMode),
    /// Run the batch scheduler.
    Hack(HackMode),
    /// Run the self-tuning controller.
    Optimize(OptimizeMode),
    /// Stop every process on every rooted node.
    KillAll,
}
