//! Boundaries to the driver: screen capture, element queries and taps.

use crate::image::{Point, Rect};
use crate::util::LocateResult;
use image::RgbImage;
use std::collections::BTreeMap;

/// Produces the current screen on demand.
pub trait ScreenSource {
    fn capture(&self) -> LocateResult<RgbImage>;
}

/// Performs a physical tap.
pub trait TapExecutor {
    fn tap(&self, point: Point) -> LocateResult<()>;
}

/// Structural element lookup.
pub trait ElementQuery {
    /// Element addressed by a logical name.
    fn find_by_name(&self, name: &str) -> Option<ElementHandle>;
    /// Element that currently holds input focus, as the driver reports it.
    fn active_element(&self) -> Option<ElementHandle>;
    /// Element whose `focused` attribute is set.
    fn find_focused(&self) -> Option<ElementHandle>;
    /// Every input-type element on screen.
    fn find_inputs(&self) -> Vec<ElementHandle>;
}

/// What a UI element can be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Clickable,
    TextInput,
    Label,
    Unknown,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Capability::Clickable => "clickable",
            Capability::TextInput => "textInput",
            Capability::Label => "label",
            Capability::Unknown => "unknown",
        }
    }
}

/// A capability granted when the element's tag or an attribute matches.
struct CapabilityRule {
    capability: Capability,
    tags: &'static [&'static str],
    attributes: &'static [(&'static str, &'static str)],
}

/// Checked in order; the first matching rule decides.
const CAPABILITY_RULES: &[CapabilityRule] = &[
    CapabilityRule {
        capability: Capability::TextInput,
        tags: &[
            "input",
            "textarea",
            "edittext",
            "autocompletetextview",
            "xcuielementtypetextfield",
            "xcuielementtypesecuretextfield",
            "xcuielementtypetextview",
        ],
        attributes: &[("contenteditable", "true"), ("role", "textbox")],
    },
    CapabilityRule {
        capability: Capability::Clickable,
        tags: &[
            "button",
            "a",
            "imagebutton",
            "checkbox",
            "radiobutton",
            "switch",
            "select",
            "spinner",
            "xcuielementtypebutton",
            "xcuielementtypecell",
        ],
        attributes: &[("clickable", "true"), ("role", "button"), ("role", "link")],
    },
    CapabilityRule {
        capability: Capability::Label,
        tags: &[
            "label",
            "textview",
            "span",
            "p",
            "h1",
            "h2",
            "h3",
            "xcuielementtypestatictext",
        ],
        attributes: &[("role", "heading")],
    },
];

/// Handle returned by the structural query.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementHandle {
    pub id: String,
    /// Tag or widget class, e.g. `android.widget.EditText`.
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub bounds: Rect,
    pub displayed: bool,
    pub enabled: bool,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>, tag: impl Into<String>, bounds: Rect) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
            attributes: BTreeMap::new(),
            bounds,
            displayed: true,
            enabled: true,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_usable(&self) -> bool {
        self.displayed && self.enabled
    }

    pub fn is_focused(&self) -> bool {
        self.attribute("focused")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Classifies the element through the rule table.
    pub fn capability(&self) -> Capability {
        let lower = self.tag.to_lowercase();
        let short = lower.rsplit('.').next().unwrap_or(&lower);
        CAPABILITY_RULES
            .iter()
            .find(|rule| {
                rule.tags.iter().any(|t| *t == short)
                    || rule.attributes.iter().any(|(k, v)| {
                        self.attribute(k)
                            .is_some_and(|actual| actual.eq_ignore_ascii_case(v))
                    })
            })
            .map_or(Capability::Unknown, |rule| rule.capability)
    }
}
