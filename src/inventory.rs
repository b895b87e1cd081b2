//! Node inventory: who we can run on, and how much room is left.

use compact_str::CompactString;
use itertools::Itertools;
use tracing::{
    debug,
    info,
};

use crate::{
    error::SchedulerError,
    host::{
        Host,
        Program,
    },
    machine::{
        get_machines,
        Machine,
    },
    script_deploy::deploy_workers,
};

/// Node every traversal starts from.
pub const ROOT: &str = "home";

/// Free RAM on one rooted node.
#[derive(Clone, Debug, PartialEq)]
pub struct Capacity {
    pub hostname: CompactString,
    pub free: f64,
}

#[derive(Debug)]
pub struct NodeInventory {
    root: CompactString,
    home_reserve: f64,
    machines: Vec<Machine>,
}

impl NodeInventory {
    pub fn new(
        root: &str,
        home_reserve: f64,
    ) -> NodeInventory {
        NodeInventory {
            root: CompactString::from(root),
            home_reserve,
            machines: vec![],
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Rebuilds the snapshot from scratch.
    pub fn refresh(
        &mut self,
        host: &impl Host,
    ) -> &[Machine] {
        self.machines = get_machines(host, &self.root);
        debug!(nodes = self.machines.len(), "inventory refreshed");
        &self.machines
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    fn reserve_for(
        &self,
        machine: &Machine,
    ) -> f64 {
        if machine.get_hostname() == self.root {
            self.home_reserve
        }
        else {
            0.
        }
    }

    /// Rooted nodes with free RAM, largest first. Ties keep traversal order.
    pub fn available_capacity(&self) -> Vec<Capacity> {
        self.machines
            .iter()
            .filter(|m| m.is_root())
            .map(|m| Capacity {
                hostname: CompactString::from(m.get_hostname()),
                free: m.get_free_gb_ram(self.reserve_for(m)),
            })
            .filter(|c| 0. < c.free)
            .sorted_by(|a, b| b.free.total_cmp(&a.free))
            .collect()
    }

    pub fn total_free(&self) -> f64 {
        self.available_capacity().iter().map(|c| c.free).sum()
    }

    /// Applies every owned port opener, then nukes once enough ports are
    /// open. Returns whether root access was newly gained.
    pub fn attempt_unlock(
        host: &impl Host,
        machine: &mut Machine,
    ) -> bool {
        if machine.is_root() {
            return false;
        }

        let hostname = machine.get_hostname().to_owned();

        let mut owned = 0;
        for program in Program::ALL {
            if !host.has_program(program) {
                continue;
            }

            owned += 1;
            // fails quietly when the port is already open
            host.run_program(program, &hostname);
        }

        if owned < machine.get_required_open_ports() {
            return false;
        }

        if host.escalate(&hostname) {
            machine.mark_rooted();
            info!(node = %hostname, ports = owned, "root access gained");
            true
        }
        else {
            let error = SchedulerError::TransientActionFailure {
                action: "nuke",
                node: hostname,
            };
            debug!(%error, "retrying next cycle");
            false
        }
    }

    /// Unlock pass over every node in the snapshot.
    pub fn unlock_all(
        &mut self,
        host: &impl Host,
    ) -> usize {
        let newly = self
            .machines
            .iter_mut()
            .filter(|m| !m.is_root())
            .map(|m| NodeInventory::attempt_unlock(host, m))
            .filter(|unlocked| *unlocked)
            .count();

        if 0 < newly {
            info!(newly, "unlock pass finished");
        }

        newly
    }

    /// Makes sure every rooted node with RAM holds the worker scripts.
    pub fn deploy_workers(
        &self,
        host: &impl Host,
        force: bool,
    ) -> usize {
        self.machines
            .iter()
            .filter(|m| m.is_root() && 0. < m.get_max_gb_ram())
            .filter(|m| deploy_workers(host, m.get_hostname(), force))
            .count()
    }

    /// Terminates every process on every rooted node. The calling script
    /// survives its own node's sweep.
    pub fn kill_all(
        &self,
        host: &impl Host,
    ) -> usize {
        let killed = self
            .machines
            .iter()
            .filter(|m| m.is_root())
            .filter(|m| host.kill_all_on(m.get_hostname()))
            .map(|m| m.get_hostname())
            .collect::<Vec<_>>();

        info!(nodes = %killed.iter().join(", "), "killed all processes");
        killed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[test]
    fn capacity_is_rooted_positive_and_sorted() {
        let host = FakeHost::new();
        host.add_node("home", &[], |s| {
            s.has_root = true;
            s.max_ram = 40.;
        });
        host.add_worker("small", 16.);
        host.add_worker("big", 128.);
        host.add_worker("full", 0.);
        host.add_node("locked", &["home"], |s| s.max_ram = 512.);

        let mut inventory = NodeInventory::new("home", 8.);
        inventory.refresh(&host);

        let capacity = inventory.available_capacity();
        assert_eq!(
            capacity,
            vec![
                Capacity {
                    hostname: "big".into(),
                    free: 128.
                },
                Capacity {
                    hostname: "home".into(),
                    free: 32.
                },
                Capacity {
                    hostname: "small".into(),
                    free: 16.
                },
            ]
        );
        assert_eq!(inventory.total_free(), 176.);
    }

    #[test]
    fn equal_capacity_keeps_traversal_order() {
        let host = FakeHost::new();
        host.add_node("home", &[], |_| {});
        host.add_worker("first", 32.);
        host.add_worker("second", 32.);

        let mut inventory = NodeInventory::new("home", 0.);
        inventory.refresh(&host);

        let names = inventory
            .available_capacity()
            .into_iter()
            .map(|c| c.hostname)
            .collect::<Vec<_>>();
        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn unlock_needs_enough_programs() {
        let host = FakeHost::new();
        host.add_node("home", &[], |s| s.has_root = true);
        host.add_node("two-port", &["home"], |s| s.required_ports = 2);
        host.give_program(Program::BruteSsh);

        let mut inventory = NodeInventory::new("home", 0.);
        inventory.refresh(&host);
        assert_eq!(inventory.unlock_all(&host), 0);
        assert!(!host.snapshot("two-port").has_root);

        host.give_program(Program::FtpCrack);
        // brutessh was already applied; re-applying is a quiet no-op
        assert_eq!(inventory.unlock_all(&host), 1);
        assert!(host.snapshot("two-port").has_root);
        assert!(inventory
            .machines()
            .iter()
            .find(|m| m.get_hostname() == "two-port")
            .unwrap()
            .is_root());
    }

    #[test]
    fn unlock_is_not_repeated_for_rooted_nodes() {
        let host = FakeHost::new();
        host.add_node("home", &[], |s| s.has_root = true);
        host.add_node("open", &["home"], |_| {});

        let mut inventory = NodeInventory::new("home", 0.);
        inventory.refresh(&host);

        assert_eq!(inventory.unlock_all(&host), 1);
        assert_eq!(inventory.unlock_all(&host), 0);
    }

    #[test]
    fn failed_unlock_does_not_stop_the_pass() {
        let host = FakeHost::new();
        host.add_node("home", &[], |s| s.has_root = true);
        host.add_node("hard", &["home"], |s| s.required_ports = 5);
        host.add_node("easy", &["home"], |_| {});

        let mut inventory = NodeInventory::new("home", 0.);
        inventory.refresh(&host);

        assert_eq!(inventory.unlock_all(&host), 1);
        assert!(host.snapshot("easy").has_root);
    }

    #[test]
    fn kill_all_includes_the_current_node() {
        let host = FakeHost::new();
        host.add_node("home", &[], |s| s.has_root = true);
        host.add_worker("w1", 8.);
        host.add_node("locked", &["home"], |_| {});

        let mut inventory = NodeInventory::new("home", 0.);
        inventory.refresh(&host);

        assert_eq!(inventory.kill_all(&host), 2);
        assert_eq!(host.killed(), ["home", "w1"]);
    }
}
