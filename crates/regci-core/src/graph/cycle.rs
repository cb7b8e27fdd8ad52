//! Cycle detection over index-addressed dependency lists.

use std::collections::BTreeSet;

use crate::error::RegciError;

use super::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Depth-first three-colour search. `deps[i]` lists the vertices `i` depends
/// on. Returns the vertices of the first cycle found, starting at the vertex
/// the back edge points to and following dependency direction.
///
/// Roots are visited in index order, so callers that keep vertices sorted get
/// a deterministic cycle.
pub(crate) fn find_cycle(deps: &[BTreeSet<usize>]) -> Option<Vec<usize>> {
    let mut colour = vec![Colour::White; deps.len()];

    for start in 0..deps.len() {
        if colour[start] != Colour::White {
            continue;
        }
        colour[start] = Colour::Grey;
        let mut path = vec![start];
        let mut cursors = vec![deps[start].iter()];

        while let Some(cursor) = cursors.last_mut() {
            match cursor.next() {
                Some(&next) => match colour[next] {
                    Colour::White => {
                        colour[next] = Colour::Grey;
                        path.push(next);
                        cursors.push(deps[next].iter());
                    }
                    Colour::Grey => {
                        let from = path.iter().position(|&v| v == next).unwrap_or(0);
                        return Some(path[from..].to_vec());
                    }
                    Colour::Black => {}
                },
                None => {
                    cursors.pop();
                    if let Some(done) = path.pop() {
                        colour[done] = Colour::Black;
                    }
                }
            }
        }
    }
    None
}

/// Build a [`RegciError::Cycle`] from the jobs along a cycle, collapsing
/// them to distinct node keys in traversal order.
pub(crate) fn cycle_error<'a>(cycle: impl IntoIterator<Item = &'a Job>) -> RegciError {
    let mut nodes: Vec<String> = Vec::new();
    let mut jobs = Vec::new();
    for job in cycle {
        if !nodes.contains(&job.node) {
            nodes.push(job.node.clone());
        }
        jobs.push(job.job_id.clone());
    }
    RegciError::Cycle { nodes, jobs }
}
