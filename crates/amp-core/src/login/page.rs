//! HTML shown in the browser once the CLI has accepted the handoff.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

const LOGIN_SUCCESS_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/login_success.html"
));

/// Renders the success page. The `.html` template name turns on autoescaping.
///
/// # Errors
/// Returns an error if the template fails to render.
pub fn render_login_success(email: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("login_success.html", LOGIN_SUCCESS_TEMPLATE)
        .context("Failed to parse login page template")?;

    env.get_template("login_success.html")
        .context("Failed to load login page template")?
        .render(context! { email => email })
        .context("Failed to render login page")
}
