//! Membership sieve: split a metric stream by ownership.
//!
//! A metric is owned by a node set when any of its replicas matches one
//! of the node identifiers, in long (`host:port:instance`) or short
//! (`host`) form. The sieve yields owned metrics, or with `invert` the
//! metrics nobody in the set owns (stray files to clean up).

use std::collections::HashSet;

use crate::ring::Ring;

/// Whether any replica of `metric` is named in `nodes`.
pub fn owns<R: Ring + ?Sized>(ring: &R, nodes: &HashSet<String>, metric: &str) -> bool {
    ring.destinations(metric).iter().any(|d| {
        nodes.contains(d.long_form()) || nodes.contains(d.short_form())
    })
}

/// Lazy, single pass ownership filter. One ring lookup per metric.
pub struct Sieve<'a, I, R: ?Sized> {
    metrics: I,
    nodes: &'a HashSet<String>,
    ring: &'a R,
    invert: bool,
}

impl<'a, I, R: Ring + ?Sized> Sieve<'a, I, R> {
    pub fn new<T>(metrics: T, nodes: &'a HashSet<String>, ring: &'a R, invert: bool) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            metrics: metrics.into_iter(),
            nodes,
            ring,
            invert,
        }
    }
}

impl<I, R, S> Iterator for Sieve<'_, I, R>
where
    I: Iterator<Item = S>,
    R: Ring + ?Sized,
    S: AsRef<str>,
{
    type Item = S;

    fn next(&mut self) -> Option<S> {
        loop {
            let metric = self.metrics.next()?;
            if owns(self.ring, self.nodes, metric.as_ref()) != self.invert {
                return Some(metric);
            }
        }
    }
}
