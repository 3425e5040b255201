//! Operation descriptors.
//!
//! An [`Operation`] is an ordered list of atomic shell steps aimed at one
//! side of the tunnel, together with the policy used to join them. Builders
//! only assemble steps; the executor decides how to run them.

use std::fmt;

/// Which shell an operation is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpTarget {
    /// The far end of an established ssh session.
    Remote,
    /// The operator's own machine.
    Local,
}

impl OpTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpTarget::Remote => "remote",
            OpTarget::Local => "local",
        }
    }
}

impl fmt::Display for OpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the steps of an operation are joined into one shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// `a && b && c`: stop at the first failing step.
    #[default]
    Chained,
    /// `a; b; c`: attempt every step regardless of earlier failures.
    Independent,
}

impl JoinPolicy {
    /// Separator placed between rendered steps.
    pub fn separator(&self) -> &'static str {
        match self {
            JoinPolicy::Chained => " && ",
            JoinPolicy::Independent => "; ",
        }
    }
}

/// An ordered, opaque instruction for the remote or the local shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Shell the steps run in.
    pub target: OpTarget,
    /// Atomic steps, in execution order.
    pub steps: Vec<String>,
    /// Join policy for the steps.
    pub join: JoinPolicy,
}

impl Operation {
    pub fn new(target: OpTarget, join: JoinPolicy) -> Self {
        Self {
            target,
            steps: Vec::new(),
            join,
        }
    }

    pub fn remote(join: JoinPolicy) -> Self {
        Self::new(OpTarget::Remote, join)
    }

    pub fn local(join: JoinPolicy) -> Self {
        Self::new(OpTarget::Local, join)
    }

    /// Single-step operation.
    pub fn single(target: OpTarget, step: impl Into<String>) -> Self {
        Self::new(target, JoinPolicy::Chained).step(step)
    }

    /// Appends a step (builder pattern).
    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Appends a step in place.
    pub fn push(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    pub fn extend<I, S>(&mut self, steps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.extend(steps.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_remote(&self) -> bool {
        self.target == OpTarget::Remote
    }

    /// Renders the steps into a single command line.
    pub fn render(&self) -> String {
        self.steps.join(self.join.separator())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.target, self.render())
    }
}
