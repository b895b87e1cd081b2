//! In-memory [`Host`] used by the unit tests.

use std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::{
        HashMap,
        HashSet,
    },
};

use compact_str::CompactString;

use crate::{
    config::ThreadCosts,
    host::{
        Durations,
        Host,
        Program,
        ServerSnapshot,
    },
    script_deploy::Operation,
};

/// Fraction of max money one hack thread takes.
pub const HACK_PER_THREAD: f64 = 0.002;
pub const HACK_SECURITY_PER_THREAD: f64 = 0.002;
pub const GROW_SECURITY_PER_THREAD: f64 = 0.004;

#[derive(Clone, Debug, PartialEq)]
pub struct Launch {
    pub script: String,
    pub node: String,
    pub threads: u32,
    pub args: Vec<String>,
    pub pid: u32,
}

impl Launch {
    pub fn operation(&self) -> Option<Operation> {
        Operation::ALL
            .into_iter()
            .find(|op| op.script().filename == self.script)
    }
}

pub struct FakeHost {
    pub clock: Cell<f64>,
    pub level: Cell<u32>,
    pub money: Cell<f64>,
    pub costs: Cell<ThreadCosts>,
    pub formulas: Cell<bool>,
    /// Silently drops file writes.
    pub read_only: Cell<bool>,
    servers: RefCell<HashMap<String, ServerSnapshot>>,
    edges: RefCell<HashMap<String, Vec<String>>>,
    durations: RefCell<HashMap<String, Durations>>,
    programs: RefCell<HashSet<Program>>,
    opened: RefCell<HashMap<String, HashSet<Program>>>,
    files: RefCell<HashSet<(String, String)>>,
    contents: RefCell<HashMap<String, String>>,
    failing: RefCell<HashSet<String>>,
    launches: RefCell<Vec<Launch>>,
    copies: RefCell<Vec<(String, String)>>,
    killed: RefCell<Vec<String>>,
    printed: RefCell<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> FakeHost {
        FakeHost {
            clock: Cell::new(1_000_000.),
            level: Cell::new(100),
            money: Cell::new(0.),
            costs: Cell::new(ThreadCosts::default()),
            formulas: Cell::new(false),
            read_only: Cell::new(false),
            servers: Default::default(),
            edges: Default::default(),
            durations: Default::default(),
            programs: Default::default(),
            opened: Default::default(),
            files: Default::default(),
            contents: Default::default(),
            failing: Default::default(),
            launches: Default::default(),
            copies: Default::default(),
            killed: Default::default(),
            printed: Default::default(),
        }
    }

    /// Adds a node linked to `neighbors`, then lets `edit` fill in its
    /// attributes.
    pub fn add_node(
        &self,
        name: &str,
        neighbors: &[&str],
        edit: impl FnOnce(&mut ServerSnapshot),
    ) {
        let mut snapshot = ServerSnapshot {
            hostname: CompactString::from(name),
            cpu_cores: 1,
            ..ServerSnapshot::default()
        };
        edit(&mut snapshot);

        self.servers.borrow_mut().insert(name.to_owned(), snapshot);

        let mut edges = self.edges.borrow_mut();
        edges.entry(name.to_owned()).or_default();
        for neighbor in neighbors {
            edges
                .entry(name.to_owned())
                .or_default()
                .push((*neighbor).to_owned());
            edges
                .entry((*neighbor).to_owned())
                .or_default()
                .push(name.to_owned());
        }
    }

    /// Adds a rooted worker with `free` GB of RAM, linked to home.
    pub fn add_worker(
        &self,
        name: &str,
        free: f64,
    ) {
        self.add_node(name, &["home"], |s| {
            s.has_root = true;
            s.max_ram = free;
        });
    }

    /// Adds a rooted, money-holding target linked to home.
    pub fn add_target(
        &self,
        name: &str,
        max_money: f64,
        money: f64,
        min_security: f64,
        security: f64,
    ) {
        self.add_node(name, &["home"], |s| {
            s.has_root = true;
            s.max_money = max_money;
            s.money = money;
            s.min_security = min_security;
            s.security = security;
            s.required_level = 1;
        });
    }

    pub fn edit(
        &self,
        name: &str,
        edit: impl FnOnce(&mut ServerSnapshot),
    ) {
        if let Some(s) = self.servers.borrow_mut().get_mut(name) {
            edit(s);
        }
    }

    pub fn set_durations(
        &self,
        name: &str,
        durations: Durations,
    ) {
        self.durations
            .borrow_mut()
            .insert(name.to_owned(), durations);
    }

    pub fn give_program(
        &self,
        program: Program,
    ) {
        self.programs.borrow_mut().insert(program);
    }

    pub fn fail_launches_on(
        &self,
        node: &str,
    ) {
        self.failing.borrow_mut().insert(node.to_owned());
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.launches.borrow().clone()
    }

    /// `(file, node)` for every successful copy.
    pub fn copies(&self) -> Vec<(String, String)> {
        self.copies.borrow().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.borrow().clone()
    }

    pub fn printed(&self) -> Vec<String> {
        self.printed.borrow().clone()
    }

    pub fn snapshot(
        &self,
        name: &str,
    ) -> ServerSnapshot {
        self.server(name)
    }

    fn durations_of(
        &self,
        node: &str,
    ) -> Durations {
        self.durations
            .borrow()
            .get(node)
            .copied()
            .unwrap_or(Durations {
                hack: 1000.,
                grow: 3200.,
                weaken: 4000.,
            })
    }
}

impl Host for FakeHost {
    fn now(&self) -> f64 {
        self.clock.get()
    }

    fn print(
        &self,
        line: &str,
    ) {
        self.printed.borrow_mut().push(line.to_owned());
    }

    fn current_node(&self) -> String {
        "home".to_owned()
    }

    fn neighbors(
        &self,
        node: &str,
    ) -> Vec<String> {
        self.edges.borrow().get(node).cloned().unwrap_or_default()
    }

    fn server(
        &self,
        node: &str,
    ) -> ServerSnapshot {
        self.servers
            .borrow()
            .get(node)
            .cloned()
            .unwrap_or_else(|| ServerSnapshot {
                hostname: CompactString::from(node),
                ..ServerSnapshot::default()
            })
    }

    fn player_level(&self) -> u32 {
        self.level.get()
    }

    fn player_money(&self) -> f64 {
        self.money.get()
    }

    fn has_program(
        &self,
        program: Program,
    ) -> bool {
        self.programs.borrow().contains(&program)
    }

    fn run_program(
        &self,
        program: Program,
        node: &str,
    ) -> bool {
        if !self.has_program(program) {
            return false;
        }

        self.opened
            .borrow_mut()
            .entry(node.to_owned())
            .or_default()
            .insert(program)
    }

    fn escalate(
        &self,
        node: &str,
    ) -> bool {
        let opened = self
            .opened
            .borrow()
            .get(node)
            .map(|o| o.len())
            .unwrap_or(0) as u32;

        let mut servers = self.servers.borrow_mut();
        match servers.get_mut(node) {
            Some(s) if s.required_ports <= opened => {
                s.has_root = true;
                true
            },
            _ => false,
        }
    }

    fn hack_time(
        &self,
        node: &str,
    ) -> f64 {
        self.durations_of(node).hack
    }

    fn grow_time(
        &self,
        node: &str,
    ) -> f64 {
        self.durations_of(node).grow
    }

    fn weaken_time(
        &self,
        node: &str,
    ) -> f64 {
        self.durations_of(node).weaken
    }

    fn exact_durations(
        &self,
        node: &str,
    ) -> Option<Durations> {
        self.formulas.get().then(|| {
            let d = self.durations_of(node);
            // prepared targets are faster
            Durations {
                hack: d.hack * 0.9,
                grow: d.grow * 0.9,
                weaken: d.weaken * 0.9,
            }
        })
    }

    fn hack_chance(
        &self,
        _node: &str,
    ) -> f64 {
        0.8
    }

    fn hack_threads_for(
        &self,
        node: &str,
        amount: f64,
    ) -> f64 {
        let max_money = self.server(node).max_money;
        if max_money <= 0. {
            return 0.;
        }

        amount / (max_money * HACK_PER_THREAD)
    }

    fn hack_security(
        &self,
        threads: u32,
        _node: &str,
    ) -> f64 {
        threads as f64 * HACK_SECURITY_PER_THREAD
    }

    fn grow_threads_for(
        &self,
        _node: &str,
        multiplier: f64,
    ) -> f64 {
        ((multiplier - 1.) * 50.).max(0.)
    }

    fn grow_security(
        &self,
        threads: u32,
        _node: &str,
    ) -> f64 {
        threads as f64 * GROW_SECURITY_PER_THREAD
    }

    fn launch(
        &self,
        script: &str,
        node: &str,
        threads: u32,
        args: &[String],
    ) -> Option<u32> {
        if threads == 0 || self.failing.borrow().contains(node) {
            return None;
        }

        let op = Operation::ALL
            .into_iter()
            .find(|op| op.script().filename == script)?;
        let needed = threads as f64 * self.costs.get().of(op);

        let mut servers = self.servers.borrow_mut();
        let server = servers.get_mut(node)?;
        if server.max_ram - server.used_ram + 1e-9 < needed {
            return None;
        }
        server.used_ram += needed;

        let mut launches = self.launches.borrow_mut();
        let pid = launches.len() as u32 + 1;
        launches.push(Launch {
            script: script.to_owned(),
            node: node.to_owned(),
            threads,
            args: args.to_vec(),
            pid,
        });

        Some(pid)
    }

    fn kill_all_on(
        &self,
        node: &str,
    ) -> bool {
        self.killed.borrow_mut().push(node.to_owned());
        if let Some(s) = self.servers.borrow_mut().get_mut(node) {
            s.used_ram = 0.;
        }
        true
    }

    fn file_exists(
        &self,
        file: &str,
        node: &str,
    ) -> bool {
        self.files
            .borrow()
            .contains(&(node.to_owned(), file.to_owned()))
    }

    fn write_file(
        &self,
        file: &str,
        contents: &str,
    ) {
        if self.read_only.get() {
            return;
        }

        self.files
            .borrow_mut()
            .insert((self.current_node(), file.to_owned()));
        self.contents
            .borrow_mut()
            .insert(file.to_owned(), contents.to_owned());
    }

    fn read_file(
        &self,
        file: &str,
    ) -> String {
        self.contents.borrow().get(file).cloned().unwrap_or_default()
    }

    fn copy_file(
        &self,
        file: &str,
        node: &str,
    ) -> bool {
        if !self.file_exists(file, &self.current_node()) {
            return false;
        }

        self.files
            .borrow_mut()
            .insert((node.to_owned(), file.to_owned()));
        self.copies
            .borrow_mut()
            .push((file.to_owned(), node.to_owned()));
        true
    }
}
