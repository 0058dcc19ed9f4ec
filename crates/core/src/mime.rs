// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MIME type graph and minimum-cost filter chains.
//!
//! Vertices are MIME types; edges are conversion filters with an integer
//! cost. Every registered printer contributes a `printer/<name>` sink vertex.
//! Chain lookup is Dijkstra with ties broken by fewest hops, then by the
//! lexicographic sequence of program paths.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeSet, HashMap};

/// The pseudo-program marking "no conversion needed".
pub const PASSTHROUGH: &str = "-";

/// A conversion edge between two MIME types.
// Ord so chains can sit in the ordered search frontier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Filter {
    pub src: SmolStr,
    pub dst: SmolStr,
    pub cost: u32,
    /// Program path, or [`PASSTHROUGH`]
    pub program: String,
}

impl Filter {
    pub fn new(
        src: impl Into<SmolStr>,
        dst: impl Into<SmolStr>,
        cost: u32,
        program: impl Into<String>,
    ) -> Self {
        Self { src: src.into(), dst: dst.into(), cost, program: program.into() }
    }

    pub fn is_passthrough(&self) -> bool {
        self.program == PASSTHROUGH
    }

    /// Effective cost; passthrough edges are free.
    fn edge_cost(&self) -> u32 {
        if self.is_passthrough() {
            0
        } else {
            self.cost
        }
    }
}

/// A resolved conversion chain. Passthrough sentinels are omitted from
/// `filters`; `raw` records that the chain ended in one, which suppresses a
/// back-end-only dispatch for the final stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterChain {
    pub filters: Vec<Filter>,
    pub raw: bool,
}

/// The filter database.
#[derive(Debug, Clone, Default)]
pub struct MimeGraph {
    /// Edges grouped by source type (wildcard sources under `super/*`)
    edges: HashMap<SmolStr, Vec<Filter>>,
}

impl MimeGraph {
    pub fn add_filter(&mut self, filter: Filter) {
        self.edges.entry(normalize(&filter.src)).or_default().push(filter);
    }

    /// Register a printer's conversion edges, all sinking at its
    /// `printer/<name>` vertex.
    pub fn add_printer_filters(&mut self, printer: &str, filters: impl IntoIterator<Item = Filter>) {
        let sink = printer_type(printer);
        for mut f in filters {
            f.dst = sink.clone();
            self.add_filter(f);
        }
    }

    /// Drop every edge ending at the printer's sink vertex.
    pub fn remove_printer_filters(&mut self, printer: &str) {
        let sink = printer_type(printer);
        for list in self.edges.values_mut() {
            list.retain(|f| f.dst != sink);
        }
        self.edges.retain(|_, list| !list.is_empty());
    }

    pub fn filter_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Edges leaving `mime_type`, including wildcard-source matches.
    fn edges_from(&self, mime_type: &str) -> Vec<&Filter> {
        let mut out: Vec<&Filter> = Vec::new();
        if let Some(list) = self.edges.get(&normalize(mime_type)) {
            out.extend(list.iter());
        }
        if let Some((super_type, _)) = mime_type.split_once('/') {
            let wild = normalize(&format!("{super_type}/*"));
            if let Some(list) = self.edges.get(&wild) {
                out.extend(list.iter());
            }
        }
        out
    }

    /// Minimum-cost chain converting `src` to `dst`, or None when no path
    /// exists. Ties break on fewest hops, then lexicographic program paths.
    pub fn filters(&self, src: &str, dst: &str) -> Option<FilterChain> {
        let src = normalize(src);
        let dst = normalize(dst);
        if src == dst {
            return Some(FilterChain { filters: Vec::new(), raw: true });
        }

        // Frontier ordered by (cost, hops, programs, vertex): BTreeSet pops
        // the best candidate first and the program list makes tie-breaks
        // deterministic.
        #[allow(clippy::type_complexity)]
        let mut frontier: BTreeSet<(u32, usize, Vec<String>, SmolStr, Vec<Filter>)> =
            BTreeSet::new();
        frontier.insert((0, 0, Vec::new(), src, Vec::new()));
        let mut settled: HashMap<SmolStr, (u32, usize, Vec<String>)> = HashMap::new();

        while let Some((cost, hops, programs, vertex, chain)) = frontier.pop_first() {
            if vertex == dst {
                let raw = chain.last().is_some_and(Filter::is_passthrough);
                let filters =
                    chain.into_iter().filter(|f| !f.is_passthrough()).collect();
                return Some(FilterChain { filters, raw });
            }
            match settled.get(&vertex) {
                Some(best) if *best <= (cost, hops, programs.clone()) => continue,
                _ => {
                    settled.insert(vertex.clone(), (cost, hops, programs.clone()));
                }
            }

            for edge in self.edges_from(&vertex) {
                let next = normalize(&edge.dst);
                if chain.iter().any(|f| normalize(&f.src) == next) {
                    continue; // no cycles through an already-visited source
                }
                let mut programs = programs.clone();
                let mut hop = hops;
                if !edge.is_passthrough() {
                    programs.push(edge.program.clone());
                    hop += 1;
                }
                let mut chain = chain.clone();
                chain.push(edge.clone());
                frontier.insert((cost + edge.edge_cost(), hop, programs, next, chain));
            }
        }
        None
    }
}

/// The sink vertex name for a printer.
pub fn printer_type(printer: &str) -> SmolStr {
    SmolStr::new(format!("printer/{}", printer.to_ascii_lowercase()))
}

fn normalize(t: &str) -> SmolStr {
    SmolStr::new(t.to_ascii_lowercase())
}

#[cfg(test)]
#[path = "mime_tests.rs"]
mod tests;
