use std::collections::{
    HashSet,
    VecDeque,
};

use compact_str::CompactString;

use crate::host::{
    Host,
    ServerSnapshot,
};

/// A node as seen during one inventory refresh.
#[derive(Clone, Debug)]
pub struct Machine {
    degree: usize,
    traversal: Vec<CompactString>,
    server: ServerSnapshot,
}

impl Machine {
    pub fn root(
        host: &impl Host,
        hostname: &str,
    ) -> Machine {
        Machine {
            degree: 0,
            traversal: vec![CompactString::from(hostname)],
            server: host.server(hostname),
        }
    }

    pub fn create_child(
        &self,
        host: &impl Host,
        hostname: &str,
    ) -> Machine {
        let mut traversal = self.traversal.clone();
        traversal.push(CompactString::from(hostname));

        Machine {
            degree: self.degree + 1,
            traversal,
            server: host.server(hostname),
        }
    }

    pub fn get_hostname(&self) -> &str {
        &self.server.hostname
    }

    pub fn get_degree(&self) -> usize {
        self.degree
    }

    /// Path from the root to this node, both ends included.
    pub fn get_traversal(&self) -> &[CompactString] {
        &self.traversal
    }

    pub fn server(&self) -> &ServerSnapshot {
        &self.server
    }

    pub fn is_root(&self) -> bool {
        self.server.has_root
    }

    pub fn is_player_owned(&self) -> bool {
        self.server.purchased
    }

    pub fn get_max_money(&self) -> f64 {
        self.server.max_money
    }

    pub fn get_min_hacking_skill(&self) -> u32 {
        self.server.required_level
    }

    pub fn get_required_open_ports(&self) -> u32 {
        self.server.required_ports
    }

    pub fn get_max_gb_ram(&self) -> f64 {
        self.server.max_ram
    }

    /// Free RAM after holding back `reserve` GB.
    pub fn get_free_gb_ram(
        &self,
        reserve: f64,
    ) -> f64 {
        (self.server.max_ram - self.server.used_ram - reserve).max(0.)
    }

    pub(crate) fn mark_rooted(&mut self) {
        self.server.has_root = true;
    }
}

/// Walks the network breadth first from `root`, visiting each node once.
pub fn get_machines(
    host: &impl Host,
    root: &str,
) -> Vec<Machine> {
    let mut traversed: Vec<Machine> = vec![];
    let mut seen = HashSet::new();
    let mut pending = VecDeque::new();

    seen.insert(root.to_owned());
    pending.push_back(Machine::root(host, root));

    while let Some(machine) = pending.pop_front() {
        for child_name in host.neighbors(machine.get_hostname()) {
            // don't consider machines that are already found
            if !seen.insert(child_name.clone()) {
                continue;
            }

            pending.push_back(machine.create_child(host, &child_name));
        }

        traversed.push(machine);
    }

    traversed
}
