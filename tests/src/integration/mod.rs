//! Pipeline scenarios spanning the batcher, its stages and the finalizer.

#[cfg(test)]
mod harness;
#[cfg(test)]
mod invariants;
#[cfg(test)]
mod pipeline;
#[cfg(test)]
mod recovery;
