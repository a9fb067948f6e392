use axum::response::Html;
use minijinja::{context, Environment};

const CHALLENGE: &str = "challenge.html";
const INDEX: &str = "index.html";

/// HTML pages served next to the JSON API.
///
/// Template names end in `.html`, so every value is HTML-escaped on render.
pub struct Pages {
    env: Environment<'static>,
}

impl Pages {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(CHALLENGE, include_str!("../templates/challenge.html"))?;
        env.add_template(INDEX, include_str!("../templates/index.html"))?;
        Ok(Self { env })
    }

    /// reCAPTCHA form that resubmits to the same download URL.
    pub fn challenge(&self, file_name: &str, site_key: &str) -> Result<Html<String>, minijinja::Error> {
        let page = self
            .env
            .get_template(CHALLENGE)?
            .render(context! { file_name, site_key })?;
        Ok(Html(page))
    }

    pub fn index(
        &self,
        domain: &str,
        max_upload_bytes: u64,
        threshold: i64,
    ) -> Result<Html<String>, minijinja::Error> {
        let page = self
            .env
            .get_template(INDEX)?
            .render(context! { domain, max_upload_bytes, threshold })?;
        Ok(Html(page))
    }
}
