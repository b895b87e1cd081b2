use std::fmt::Write as _;

use clap::{
    Args,
    ValueEnum,
};
use itertools::Itertools;

use crate::{
    host::Host,
    inventory::{
        NodeInventory,
        ROOT,
    },
    machine::Machine,
};

enum NukeResult {
    JustNuked,
    WasNuked,
    NotNuked,
}

impl NukeResult {
    fn to_stat_column_char(&self) -> char {
        use NukeResult::*;

        match self {
            JustNuked => '.',
            WasNuked => '!',
            NotNuked => ' ',
        }
    }
}

fn nuke(
    host: &impl Host,
    machine: &mut Machine,
) -> NukeResult {
    use NukeResult::*;

    if machine.is_root() {
        return WasNuked;
    }

    if NodeInventory::attempt_unlock(host, machine) {
        JustNuked
    }
    else {
        NotNuked
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum DisplayMode {
    Path,
    Cd,
    Name,
}

impl DisplayMode {
    fn render(
        &self,
        machine: &Machine,
    ) -> String {
        use DisplayMode::*;

        match self {
            Name => machine.get_hostname().to_owned(),
            Path => machine.get_traversal().iter().join(" -> "),
            // the root is where the terminal already is
            Cd => machine
                .get_traversal()
                .iter()
                .skip(1)
                .map(|hop| format!("connect {};", hop))
                .join(" "),
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ExecMode {
    Scan,
    Nuke,
}

#[derive(Args, Debug)]
pub struct ScanMode {
    #[arg(long, short, value_enum, default_value_t = ExecMode::Scan)]
    exec: ExecMode,
    #[arg(long, short, value_enum, default_value_t = DisplayMode::Name)]
    display: DisplayMode,
}

impl ScanMode {
    /// Runs the scan and returns the report for the terminal.
    pub fn execute(
        &self,
        host: &impl Host,
    ) -> String {
        use ExecMode::*;

        let mut inventory = NodeInventory::new(ROOT, 0.);
        let mut machines = inventory.refresh(host).to_vec();

        machines.sort_by(|m1, m2| {
            m1.get_degree()
                .cmp(&m2.get_degree())
                .then(m1.get_hostname().cmp(m2.get_hostname()))
        });

        match self.exec {
            Nuke => nuke_mode(host, &self.display, &mut machines),
            Scan => scan_mode(&self.display, &machines),
        }
    }
}

/// Digits in the integer part, for column widths.
fn digits(value: f64) -> usize {
    value.max(1.).log10().floor() as usize + 1
}

fn scan_mode(
    display: &DisplayMode,
    network: &[Machine],
) -> String {
    let names = network.iter().map(|m| display.render(m)).collect::<Vec<_>>();

    let name_len = names.iter().map(|n| n.len()).max().unwrap_or(0);
    let mm_len = network
        .iter()
        .map(|m| digits(m.get_max_money()))
        .max()
        .unwrap_or(1);
    let hs_len = network
        .iter()
        .map(|m| digits(m.get_min_hacking_skill() as f64))
        .max()
        .unwrap_or(1);
    let ram_len = network
        .iter()
        .map(|m| digits(m.get_max_gb_ram()))
        .max()
        .unwrap_or(1);

    let mut print_str = "\n".to_owned();
    for (machine, name) in network.iter().zip(names) {
        let player_owned = match machine.is_player_owned() {
            true => "  Owned  ",
            false => "Not Owned",
        };
        let rooted = match machine.is_root() {
            true => "Root",
            false => "    ",
        };

        let _ = writeln!(
            &mut print_str,
            "{: <lnl$}   {: >2}°   ${: >lmm$.0}   {}   {}   Hack Lvl {: >lhs$}   \
             {: >5.1} Sec   {: >lram$.0} GB   {} Ports",
            name,
            machine.get_degree(),
            machine.get_max_money(),
            player_owned,
            rooted,
            machine.get_min_hacking_skill(),
            machine.server().min_security,
            machine.get_max_gb_ram(),
            machine.get_required_open_ports(),
            lnl = name_len,
            lmm = mm_len,
            lhs = hs_len,
            lram = ram_len,
        );
    }

    print_str
}

fn nuke_mode(
    host: &impl Host,
    display: &DisplayMode,
    network: &mut [Machine],
) -> String {
    let nuked_machines = network
        .iter_mut()
        .map(|m| {
            let nuke_stat = nuke(host, m);
            (display.render(m), nuke_stat)
        })
        .collect::<Vec<_>>();

    let longest_name_len = nuked_machines
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);

    let mut print_str = "\n".to_owned();
    for (name, status) in nuked_machines.into_iter() {
        let _ = writeln!(
            &mut print_str,
            "{: <lnl$}  {}",
            name,
            status.to_stat_column_char(),
            lnl = longest_name_len,
        );
    }

    print_str
}
