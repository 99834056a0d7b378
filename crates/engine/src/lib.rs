//! Stencil engine: compiles text templates into a tag tree and renders the
//! tree against a dynamic [`Value`] from `stencil-core`.
//!
//! Recognised tags:
//! - `{var:path}` - HTML-escaped substitution
//! - `{raw:path}` - raw substitution
//! - `{math:expr}` - evaluated arithmetic/logic expression
//! - `{svar:path, sub0, sub1, ...}` - format-string substitution with
//!   `{0}`..`{9}` placeholders
//! - `{if case="expr" true="..." false="..."}` - inline conditional
//! - `<loop set=.. value=.. group=.. sort=..>...</loop>`
//! - `<if case="...">...<else if case="...">...<else>...</if>`
//!
//! Nothing raises: malformed tags drop out at parse time, unresolvable
//! variables render as their own template literal, and failed expressions
//! make a math tag inert and a condition false.
//!
//! Parse once, render many:
//!
//! ```
//! use stencil_core::json;
//! use stencil_engine::Template;
//!
//! let template = Template::compile("hello {var:name}");
//! let value = json::parse(r#"{"name": "<w>"}"#);
//! assert_eq!(template.render(&value), "hello &lt;w&gt;");
//! ```

pub mod eval;
pub mod expr;
pub mod parser;
pub mod render;
pub mod scanner;
pub mod tags;

use stencil_core::value::Value;

use crate::render::Renderer;
use crate::tags::TagBit;

pub use crate::render::escape_html;

/// A compiled template: the source text plus its tag tree.
///
/// The tag tree is read-only after compilation and holds only byte offsets
/// into the source, so one `Template` can render any number of value trees.
pub struct Template<'t> {
    content: &'t str,
    tags: Vec<TagBit>,
}

impl<'t> Template<'t> {
    /// Parses the template once; malformed constructs are dropped at their
    /// outermost scope and the rest still compiles.
    pub fn compile(content: &'t str) -> Self {
        Self {
            content,
            tags: parser::parse(content),
        }
    }

    pub fn source(&self) -> &'t str {
        self.content
    }

    pub fn tags(&self) -> &[TagBit] {
        &self.tags
    }

    /// Renders against `value` into a fresh string.
    pub fn render(&self, value: &Value) -> String {
        let mut out = String::with_capacity(self.content.len());
        self.render_into(&mut out, value);
        out
    }

    /// Renders against `value`, appending to `out`.
    pub fn render_into(&self, out: &mut String, value: &Value) {
        let mut renderer = Renderer::new(self.content, value);
        renderer.render(out, &self.tags, 0, self.content.len());
    }
}

/// One-shot convenience: compile and render in a single call.
pub fn render(content: &str, value: &Value) -> String {
    Template::compile(content).render(value)
}
