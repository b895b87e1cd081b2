//! The capability surface the scheduler consumes from the simulation.
//!
//! Everything the core algorithms know about the outside world goes through
//! [`Host`]. [`NsWrapper`] implements it on top of the script runtime; the
//! tests implement it with an in-memory fake.

use compact_str::CompactString;
use wasm_bindgen::JsValue;

use crate::{
    netscript::{
        Date,
        NsWrapper,
    },
    utils::get_attribute,
};

/// Reduction of security per weaken thread on a single-core host.
pub const WEAKEN_SECURITY_DECREASE: f64 = 0.05;

/// Per-node attributes read in one go.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerSnapshot {
    pub hostname: CompactString,
    pub has_root: bool,
    pub purchased: bool,
    pub max_ram: f64,
    pub used_ram: f64,
    pub cpu_cores: u32,
    pub max_money: f64,
    pub money: f64,
    pub min_security: f64,
    pub security: f64,
    pub required_level: u32,
    pub required_ports: u32,
}

/// Port openers. Owning one counts as an unlock credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Program {
    BruteSsh,
    FtpCrack,
    RelaySmtp,
    HttpWorm,
    SqlInject,
}

impl Program {
    pub const ALL: [Program; 5] = [
        Program::BruteSsh,
        Program::FtpCrack,
        Program::RelaySmtp,
        Program::HttpWorm,
        Program::SqlInject,
    ];

    pub fn filename(&self) -> &'static str {
        use Program::*;

        match self {
            BruteSsh => "BruteSSH.exe",
            FtpCrack => "FTPCrack.exe",
            RelaySmtp => "relaySMTP.exe",
            HttpWorm => "HTTPWorm.exe",
            SqlInject => "SQLInject.exe",
        }
    }
}

/// Operation durations in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Durations {
    pub hack: f64,
    pub grow: f64,
    pub weaken: f64,
}

pub trait Host {
    /// Milliseconds since the epoch.
    fn now(&self) -> f64;

    fn print(
        &self,
        line: &str,
    );

    /// Name of the node this process runs on.
    fn current_node(&self) -> String;

    fn neighbors(
        &self,
        node: &str,
    ) -> Vec<String>;

    fn server(
        &self,
        node: &str,
    ) -> ServerSnapshot;

    fn player_level(&self) -> u32;

    fn player_money(&self) -> f64;

    fn has_program(
        &self,
        program: Program,
    ) -> bool;

    /// Returns false when the program failed or was already applied.
    fn run_program(
        &self,
        program: Program,
        node: &str,
    ) -> bool;

    fn escalate(
        &self,
        node: &str,
    ) -> bool;

    fn hack_time(
        &self,
        node: &str,
    ) -> f64;

    fn grow_time(
        &self,
        node: &str,
    ) -> f64;

    fn weaken_time(
        &self,
        node: &str,
    ) -> f64;

    /// Exact durations at minimum security and maximum money, if a precision
    /// tool is available.
    fn exact_durations(
        &self,
        node: &str,
    ) -> Option<Durations>;

    fn hack_chance(
        &self,
        node: &str,
    ) -> f64;

    /// Threads needed to take `amount` money in one hack.
    fn hack_threads_for(
        &self,
        node: &str,
        amount: f64,
    ) -> f64;

    fn hack_security(
        &self,
        threads: u32,
        node: &str,
    ) -> f64;

    /// Threads needed to multiply the money on `node` by `multiplier`.
    fn grow_threads_for(
        &self,
        node: &str,
        multiplier: f64,
    ) -> f64;

    fn grow_security(
        &self,
        threads: u32,
        node: &str,
    ) -> f64;

    fn weaken_per_thread(&self) -> f64 {
        WEAKEN_SECURITY_DECREASE
    }

    /// Starts `script` with `threads` threads. `None` is the failure sentinel.
    fn launch(
        &self,
        script: &str,
        node: &str,
        threads: u32,
        args: &[String],
    ) -> Option<u32>;

    fn kill_all_on(
        &self,
        node: &str,
    ) -> bool;

    fn file_exists(
        &self,
        file: &str,
        node: &str,
    ) -> bool;

    fn write_file(
        &self,
        file: &str,
        contents: &str,
    );

    fn read_file(
        &self,
        file: &str,
    ) -> String;

    /// Copies `file` from the current node to `node`.
    fn copy_file(
        &self,
        file: &str,
        node: &str,
    ) -> bool;
}

impl Host for NsWrapper<'_> {
    fn now(&self) -> f64 {
        Date::now()
    }

    fn print(
        &self,
        line: &str,
    ) {
        NsWrapper::print(self, line)
    }

    fn current_node(&self) -> String {
        self.get_hostname()
    }

    fn neighbors(
        &self,
        node: &str,
    ) -> Vec<String> {
        self.scan(Some(node))
    }

    fn server(
        &self,
        node: &str,
    ) -> ServerSnapshot {
        let server = self.get_server(Some(node));
        let num = |field: &str| {
            get_attribute(&server, field, JsValue::as_f64)
                .ok()
                .flatten()
                .unwrap_or_default()
        };
        let flag = |field: &str| {
            get_attribute(&server, field, JsValue::as_bool)
                .ok()
                .flatten()
                .unwrap_or_default()
        };

        ServerSnapshot {
            hostname: CompactString::from(node),
            has_root: flag("hasAdminRights"),
            purchased: flag("purchasedByPlayer"),
            max_ram: num("maxRam"),
            used_ram: num("ramUsed"),
            cpu_cores: num("cpuCores") as u32,
            max_money: num("moneyMax"),
            money: num("moneyAvailable"),
            min_security: num("minDifficulty"),
            security: num("hackDifficulty"),
            required_level: num("requiredHackingSkill") as u32,
            required_ports: num("numOpenPortsRequired") as u32,
        }
    }

    fn player_level(&self) -> u32 {
        self.get_player_hacking_level()
    }

    fn player_money(&self) -> f64 {
        self.get_server_money_available("home")
    }

    fn has_program(
        &self,
        program: Program,
    ) -> bool {
        self.file_exists(program.filename(), "home")
    }

    fn run_program(
        &self,
        program: Program,
        node: &str,
    ) -> bool {
        use Program::*;

        match program {
            BruteSsh => self.brute_ssh(node),
            FtpCrack => self.ftp_crack(node),
            RelaySmtp => self.relay_smtp(node),
            HttpWorm => self.http_worm(node),
            SqlInject => self.sql_inject(node),
        }
    }

    fn escalate(
        &self,
        node: &str,
    ) -> bool {
        self.nuke(node)
    }

    fn hack_time(
        &self,
        node: &str,
    ) -> f64 {
        self.get_hack_time(node)
    }

    fn grow_time(
        &self,
        node: &str,
    ) -> f64 {
        self.get_grow_time(node)
    }

    fn weaken_time(
        &self,
        node: &str,
    ) -> f64 {
        self.get_weaken_time(node)
    }

    fn exact_durations(
        &self,
        node: &str,
    ) -> Option<Durations> {
        if !NsWrapper::file_exists(self, "Formulas.exe", "home") {
            return None;
        }

        self.formulas_hgw_time(node)
            .ok()
            .map(|(hack, grow, weaken)| Durations { hack, grow, weaken })
    }

    fn hack_chance(
        &self,
        node: &str,
    ) -> f64 {
        self.hack_analyze_chance(node)
    }

    fn hack_threads_for(
        &self,
        node: &str,
        amount: f64,
    ) -> f64 {
        self.hack_analyze_threads(node, amount)
    }

    fn hack_security(
        &self,
        threads: u32,
        node: &str,
    ) -> f64 {
        self.hack_analyze_security(threads, node)
    }

    fn grow_threads_for(
        &self,
        node: &str,
        multiplier: f64,
    ) -> f64 {
        self.growth_analyze(node, multiplier, None)
    }

    fn grow_security(
        &self,
        threads: u32,
        node: &str,
    ) -> f64 {
        self.growth_analyze_security(threads, node)
    }

    fn weaken_per_thread(&self) -> f64 {
        self.weaken_analyze(1)
    }

    fn launch(
        &self,
        script: &str,
        node: &str,
        threads: u32,
        args: &[String],
    ) -> Option<u32> {
        self.exec(script, node, Some(threads), args).ok().flatten()
    }

    fn kill_all_on(
        &self,
        node: &str,
    ) -> bool {
        self.killall(node)
    }

    fn file_exists(
        &self,
        file: &str,
        node: &str,
    ) -> bool {
        NsWrapper::file_exists(self, file, node)
    }

    fn write_file(
        &self,
        file: &str,
        contents: &str,
    ) {
        self.write(file, contents)
    }

    fn read_file(
        &self,
        file: &str,
    ) -> String {
        self.read(file)
    }

    fn copy_file(
        &self,
        file: &str,
        node: &str,
    ) -> bool {
        let source = self.get_hostname();
        self.scp(file, node, &source)
    }
}
