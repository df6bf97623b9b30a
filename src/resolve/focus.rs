//! Finding the input that received focus after a coordinate tap.

use crate::image::Point;
use crate::resolve::collab::{Capability, ElementHandle, ElementQuery};
use crate::trace::trace_debug;

/// Outcome of resolving an element handle.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedHandle {
    Element(ElementHandle),
    /// The action already happened by coordinates; there is no handle to return.
    ActionAlreadyPerformed,
    /// Only a screen point was resolved; nothing was acted on.
    Located(Point),
    NotFound,
}

impl ResolvedHandle {
    pub fn element(&self) -> Option<&ElementHandle> {
        match self {
            ResolvedHandle::Element(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Link of the focus chain that produced a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FocusSource {
    ActiveElement,
    FocusedAttribute,
    FocusedInputScan,
    InputScan,
}

fn usable_input(handle: &ElementHandle) -> bool {
    handle.is_usable() && handle.capability() == Capability::TextInput
}

/// Walks active element, focused attribute, focused input scan, then any input.
///
/// The last resort prefers the input containing `near`, then the one whose
/// center is closest to it. When nothing is found the result is
/// `ActionAlreadyPerformed` if a tap happened and `NotFound` otherwise.
pub fn locate_focused(
    query: &dyn ElementQuery,
    near: Option<Point>,
    action_performed: bool,
) -> (ResolvedHandle, Option<FocusSource>) {
    let direct = [
        (FocusSource::ActiveElement, query.active_element()),
        (FocusSource::FocusedAttribute, query.find_focused()),
    ];
    for (source, handle) in direct {
        if let Some(handle) = handle.filter(usable_input) {
            trace_debug!("focused input via {:?}", source);
            return (ResolvedHandle::Element(handle), Some(source));
        }
    }

    let inputs: Vec<ElementHandle> = query.find_inputs().into_iter().filter(usable_input).collect();
    if let Some(handle) = inputs.iter().find(|h| h.is_focused()) {
        return (
            ResolvedHandle::Element(handle.clone()),
            Some(FocusSource::FocusedInputScan),
        );
    }

    let fallback = match near {
        Some(p) => inputs
            .iter()
            .find(|h| h.bounds.contains(p))
            .or_else(|| {
                inputs.iter().min_by_key(|h| {
                    let c = h.bounds.center();
                    let (dx, dy) = ((c.x - p.x) as i64, (c.y - p.y) as i64);
                    dx * dx + dy * dy
                })
            }),
        None => inputs.first(),
    };
    if let Some(handle) = fallback {
        return (
            ResolvedHandle::Element(handle.clone()),
            Some(FocusSource::InputScan),
        );
    }

    let inert = if action_performed {
        ResolvedHandle::ActionAlreadyPerformed
    } else {
        ResolvedHandle::NotFound
    };
    (inert, None)
}
