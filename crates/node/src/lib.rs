//! Process glue around the merge coordinator.
//!
//! Inbound messages land in single-slot [`Mailbox`]es, a fixed-rate loop runs
//! one merge cycle whenever something new arrived, and results are written out
//! through a [`DirectorySink`].

mod mailbox;
mod run;
mod transport;

pub use mailbox::{Inputs, Mailbox};
pub use run::{run, run_until, NodeConfig};
pub use transport::{DirectorySink, DirectoryTransport, TransportError};

#[cfg(test)]
mod tests;
