use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

use crate::host::Host;

pub struct DynamicFile<'a> {
    pub filename: &'a str,
    pub contents: &'a str,
}

impl<'a> DynamicFile<'a> {
    /// Writes the file on the current node, replacing an outdated copy.
    pub fn materialize(
        &self,
        host: &impl Host,
    ) -> bool {
        let current = host.current_node();
        if !host.file_exists(self.filename, &current) ||
            host.read_file(self.filename) != self.contents
        {
            host.write_file(self.filename, self.contents);
        }

        host.file_exists(self.filename, &current)
    }

    /// Copies the file to `node`, writing it locally first if needed.
    pub fn deploy_to(
        &self,
        host: &impl Host,
        node: &str,
        force: bool,
    ) -> bool {
        if !force && host.file_exists(self.filename, node) {
            return true;
        }

        if node == host.current_node() {
            return self.materialize(host);
        }

        if !self.materialize(host) {
            return false;
        }

        host.copy_file(self.filename, node);
        let deployed = host.file_exists(self.filename, node);
        debug!(file = self.filename, node, deployed, "worker deployed");
        deployed
    }
}

pub const WEAKEN_SCRIPT: DynamicFile<'static> = DynamicFile {
    filename: "/workers/weaken.js",
    contents: include_str!("workers/weaken.js"),
};

pub const HACK_SCRIPT: DynamicFile<'static> = DynamicFile {
    filename: "/workers/hack.js",
    contents: include_str!("workers/hack.js"),
};

pub const GROW_SCRIPT: DynamicFile<'static> = DynamicFile {
    filename: "/workers/grow.js",
    contents: include_str!("workers/grow.js"),
};

/// The three worker operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Hack,
    Grow,
    Weaken,
}

impl Operation {
    pub const ALL: [Operation; 3] =
        [Operation::Hack, Operation::Grow, Operation::Weaken];

    pub fn script(&self) -> &'static DynamicFile<'static> {
        use Operation::*;

        match self {
            Hack => &HACK_SCRIPT,
            Weaken => &WEAKEN_SCRIPT,
            Grow => &GROW_SCRIPT,
        }
    }

    /// Security added to (positive) or removed from (negative) `target` by
    /// `threads` threads of this operation.
    pub fn security_effect(
        &self,
        host: &impl Host,
        target: &str,
        threads: u32,
    ) -> f64 {
        use Operation::*;

        match self {
            Hack => host.hack_security(threads, target),
            Grow => host.grow_security(threads, target),
            Weaken => -(threads as f64) * host.weaken_per_thread(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        use Operation::*;

        match self {
            Hack => "hack",
            Grow => "grow",
            Weaken => "weaken",
        }
    }
}

/// Places every worker script on `node`. With `force`, copies already
/// present are overwritten.
pub fn deploy_workers(
    host: &impl Host,
    node: &str,
    force: bool,
) -> bool {
    Operation::ALL
        .iter()
        .all(|op| op.script().deploy_to(host, node, force))
}
