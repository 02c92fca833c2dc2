#![allow(clippy::result_large_err)]

//! Test skeletons in the compact dialect, picked from a prompt.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A compact-dialect body without its `test:` line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationTemplate {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Words or phrases that select this template from a prompt.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip)]
    pub body: String,
}

impl GenerationTemplate {
    fn built_in(name: &str, description: &str, tags: &[&str], keywords: &[&str], body: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            keywords: keywords.iter().map(|word| word.to_string()).collect(),
            body: body.to_string(),
        }
    }
}

/// Result of `generate`: the document text plus advice about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generated {
    /// `None` when no template matched and the generic skeleton was used.
    pub template: Option<String>,
    pub yaml: String,
    pub suggestions: Vec<String>,
}

pub struct TemplateLibrary {
    templates: Vec<GenerationTemplate>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::built_in()
    }
}

impl TemplateLibrary {
    pub fn built_in() -> Self {
        Self {
            templates: built_in_templates(),
        }
    }

    /// Built-in templates plus every `*.yaml` under `<workspace>/.stepline/templates/`.
    /// A workspace template replaces the built-in one with the same name.
    pub fn with_workspace(workspace: &Path) -> Result<Self, AppError> {
        let mut library = Self::built_in();
        let dir = workspace.join(".stepline/templates");
        if !dir.is_dir() {
            return Ok(library);
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to scan templates directory {}: {}", dir.display(), e),
            )
        })? {
            let path = entry
                .map_err(|e| {
                    AppError::new(
                        ErrorCategory::IoError,
                        format!("Failed to inspect template entry in {}: {}", dir.display(), e),
                    )
                })?
                .path();
            let is_yaml = path
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if path.is_file() && is_yaml {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            library.insert(load_template(&path)?);
        }
        Ok(library)
    }

    fn insert(&mut self, template: GenerationTemplate) {
        match self.templates.iter_mut().find(|known| known.name == template.name) {
            Some(known) => *known = template,
            None => self.templates.push(template),
        }
    }

    pub fn get(&self, name: &str) -> Option<&GenerationTemplate> {
        self.templates.iter().find(|template| template.name == name)
    }

    pub fn by_tag(&self, tag: &str) -> Vec<&GenerationTemplate> {
        self.templates
            .iter()
            .filter(|template| template.tags.iter().any(|known| known == tag))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().map(|template| template.name.as_str()).collect()
    }

    pub fn templates(&self) -> &[GenerationTemplate] {
        &self.templates
    }

    /// First template, in library order, with a keyword among the prompt's words.
    pub fn match_prompt(&self, prompt: &str) -> Option<&GenerationTemplate> {
        let words: Vec<String> = prompt
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect();
        let padded = format!(" {} ", words.join(" "));
        self.templates.iter().find(|template| {
            template
                .keywords
                .iter()
                .any(|keyword| padded.contains(&format!(" {} ", keyword)))
        })
    }
}

fn load_template(path: &Path) -> Result<GenerationTemplate, AppError> {
    let text = fs::read_to_string(path).map_err(|e| {
        AppError::new(
            ErrorCategory::IoError,
            format!("Failed to read template {}: {}", path.display(), e),
        )
    })?;
    let tree: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| {
        AppError::new(
            ErrorCategory::ValidationError,
            format!("Template {} is not valid YAML: {}", path.display(), e),
        )
        .with_code("YAML-GEN-002")
    })?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let description = tree
        .get("desc")
        .and_then(serde_yaml::Value::as_str)
        .unwrap_or("workspace template")
        .to_string();
    Ok(GenerationTemplate {
        keywords: vec![name.to_lowercase()],
        name,
        description,
        tags: vec!["workspace".to_string()],
        body: text,
    })
}

/// Build a document for `prompt`, from `template` when given, otherwise from
/// the first template the prompt matches, otherwise from a generic skeleton.
pub fn generate(
    library: &TemplateLibrary,
    prompt: &str,
    template: Option<&str>,
) -> Result<Generated, AppError> {
    let chosen = match template {
        Some(name) => Some(library.get(name).ok_or_else(|| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("unknown template '{}'", name),
            )
            .with_code("YAML-GEN-001")
            .with_suggestion(format!("Available templates: {}", library.names().join(", ")))
        })?),
        None => library.match_prompt(prompt),
    };
    let title = quote(prompt.trim())?;
    let yaml = match chosen {
        Some(template) => {
            tracing::info!(template = %template.name, "generating from template");
            let body: String = template
                .body
                .lines()
                .filter(|line| !line.starts_with("test:"))
                .map(|line| format!("{}\n", line))
                .collect();
            format!("test: {}\n{}", title, body)
        }
        None => {
            tracing::info!("no template matched; generating a skeleton");
            format!(
                "test: {title}\ndesc: {title}\nbase: https://app.example.test\nnav: /\ndo:\n  - wait: main\n  - note: {}\n  - c: \"#start\"\n  - ch: Success\n",
                quote(&format!("replace with the steps for: {}", prompt.trim()))?,
            )
        }
    };
    Ok(Generated {
        template: chosen.map(|template| template.name.clone()),
        suggestions: suggestions(&yaml),
        yaml,
    })
}

fn quote(text: &str) -> Result<String, AppError> {
    serde_json::to_string(text).map_err(|e| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("Failed to quote '{}': {}", text, e),
        )
    })
}

/// Advice on size, repetition and timing; never blocks generation.
pub fn suggestions(yaml: &str) -> Vec<String> {
    let mut out = Vec::new();
    if yaml.split_whitespace().count() > 100 {
        out.push("Consider splitting the test or moving repeated steps into blocks".to_string());
    }

    let mut selectors: BTreeMap<String, usize> = BTreeMap::new();
    let mut clicks = 0;
    let mut fixed_waits = 0;
    for line in yaml.lines() {
        let step = line.trim().trim_start_matches("- ");
        let Some((key, value)) = step.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
        if value.starts_with('#') || value.starts_with('.') {
            *selectors.entry(value.to_string()).or_default() += 1;
        }
        match key.trim() {
            "c" => clicks += 1,
            "wait" if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) => fixed_waits += 1,
            _ => {}
        }
    }
    for (selector, count) in selectors {
        if count > 3 {
            out.push(format!(
                "Selector '{}' is used {} times; consider a block or a variable",
                selector, count
            ));
        }
    }
    if clicks > 5 {
        out.push("Several clicks in a row; a more direct route may exist".to_string());
    }
    if fixed_waits > 0 {
        out.push("Wait for an element instead of a fixed delay".to_string());
    }
    out
}

fn built_in_templates() -> Vec<GenerationTemplate> {
    vec![
        GenerationTemplate::built_in(
            "login",
            "User authentication flow",
            &["auth", "basic", "common"],
            &["login", "log in", "signin", "sign in", "auth", "authentication"],
            r##"desc: Sign in with valid credentials and land on the dashboard
base: https://app.example.test
nav: /login
data:
  username: qa.user@example.test
  password: "${ENV:TEST_PASSWORD}"
do:
  - wait: "#username"
  - t: {"#username": "{{username}}"}
  - t: {"#password": "{{password}}"}
  - c: "button[type=submit]"
  - ch: Dashboard
"##,
        ),
        GenerationTemplate::built_in(
            "purchase",
            "End-to-end purchase flow",
            &["e2e", "commerce"],
            &["purchase", "buy", "checkout", "cart", "order"],
            r##"desc: Add a product to the cart and complete checkout
base: https://shop.example.test
nav: /products
data:
  product: Trail Runner 2
  card_number: "${ENV:TEST_CARD_NUMBER}"
do:
  - wait: .product-grid
  - c: "{{product}}"
  - c: "#add-to-cart"
  - ch: Added to cart
  - c: "#cart"
  - c: "#checkout"
  - t: {"#card-number": "{{card_number}}"}
  - c: "#place-order"
  - wait: .order-confirmation
  - ch: Order confirmed
"##,
        ),
        GenerationTemplate::built_in(
            "search",
            "Search functionality test",
            &["search", "basic", "common"],
            &["search", "find", "lookup", "query"],
            r##"desc: Search for a term and check the results mention it
base: https://app.example.test
nav: /
data:
  query: wireless headphones
do:
  - wait: "#search"
  - t: {"#search": "{{query}}"}
  - k: Enter
  - wait: .results
  - ch: "{{query}}"
"##,
        ),
        GenerationTemplate::built_in(
            "form",
            "Form filling and submission",
            &["form", "input", "common"],
            &["form", "submit", "contact", "register", "registration", "signup", "sign up"],
            r##"desc: Fill in every field and submit the form
base: https://app.example.test
nav: /contact
data:
  full_name: Jane Tester
  email: jane.tester@example.test
  message: Testing the contact form
do:
  - wait: "form#contact"
  - t: {"#name": "{{full_name}}"}
  - t: {"#email": "{{email}}"}
  - select: {"#subject": Support}
  - t: {"#message": "{{message}}"}
  - c: "button[type=submit]"
  - ch: Thank you
"##,
        ),
        GenerationTemplate::built_in(
            "navigation",
            "Site navigation",
            &["navigation", "basic"],
            &["navigate", "navigation", "menu", "link", "links"],
            r##"desc: Visit each main section from the top navigation
base: https://app.example.test
nav: /
data:
  sections: [Products, Pricing, About]
do:
  - wait: nav
  - loop:
      over: "{{sections}}"
      as: section
      do:
        - c: "{{section}}"
        - ch: "{{section}}"
  - c: Home
  - ch: "#hero"
"##,
        ),
        GenerationTemplate::built_in(
            "data-driven",
            "Tests with multiple data sets",
            &["data", "loop"],
            &["data", "multiple", "each", "dataset", "datasets"],
            r##"desc: Submit the same form once per data row
base: https://app.example.test
nav: /signup
data:
  emails: [first@example.test, second@example.test, third@example.test]
do:
  - wait: "form#signup"
  - loop:
      over: "{{emails}}"
      as: email
      do:
        - clear: "#email"
        - t: {"#email": "{{email}}"}
        - c: "button[type=submit]"
        - ch: Welcome
"##,
        ),
        GenerationTemplate::built_in(
            "error-handling",
            "Error scenarios",
            &["negative", "errors"],
            &["error", "errors", "invalid", "fail", "failure", "wrong"],
            r##"desc: Submit invalid input and check the error is shown
base: https://app.example.test
nav: /login
data:
  bad_email: not-an-email
do:
  - wait: "#email"
  - t: {"#email": "{{bad_email}}"}
  - c: "button[type=submit]"
  - ch: .error-message
  - try:
      do:
        - c: "#dismiss-error"
      catch:
        - note: the error banner has no dismiss button
  - ch: "#email"
"##,
        ),
        GenerationTemplate::built_in(
            "conditional",
            "Tests with conditional logic",
            &["logic"],
            &["if", "condition", "conditional", "when", "depending"],
            r##"desc: Check the account page for the plan the account is on
base: https://app.example.test
nav: /account
data:
  plan: premium
do:
  - wait: .account-summary
  - if:
      cond: 'plan == "premium"'
      then:
        - ch: Premium features
      else:
        - ch: Upgrade
  - store: {".plan-name": current_plan}
  - ch: "{{current_plan}}"
"##,
        ),
        GenerationTemplate::built_in(
            "api-setup",
            "Start from a session prepared outside the browser",
            &["setup", "advanced"],
            &["api", "cookie", "cookies", "session", "preconditions"],
            r##"desc: Reuse a session cookie and open the dashboard directly
base: https://app.example.test
nav: /
data:
  session_id: "${ENV:TEST_SESSION_ID}"
do:
  - wait: body
  - cookie: {session: "{{session_id}}"}
  - nav: /dashboard
  - wait: .dashboard
  - ch: Dashboard
"##,
        ),
        GenerationTemplate::built_in(
            "responsive",
            "Layout checks at mobile and desktop sizes",
            &["layout", "mobile"],
            &["responsive", "mobile", "viewport", "tablet"],
            r##"desc: Open the mobile menu, then check the desktop layout
base: https://app.example.test
config:
  viewport: 375x812
nav: /
do:
  - wait: .menu-toggle
  - c: .menu-toggle
  - ch: nav.mobile-menu
  - window: 1280x800
  - ch: nav.desktop-menu
"##,
        ),
        GenerationTemplate::built_in(
            "accessibility",
            "Keyboard and landmark checks",
            &["a11y"],
            &["accessibility", "accessible", "a11y", "aria", "keyboard"],
            r##"desc: Reach the main content with the keyboard
base: https://app.example.test
nav: /
do:
  - wait: main
  - ch: "[aria-label='Main navigation']"
  - k: Tab
  - ch: ":focus"
  - k: Enter
  - ch: "main h1"
"##,
        ),
        GenerationTemplate::built_in(
            "performance",
            "Key elements render within a time budget",
            &["speed"],
            &["performance", "speed", "slow", "fast", "load"],
            r##"desc: Key content appears within three seconds
base: https://app.example.test
nav: /
do:
  - wait: {for: main, max: 3000}
  - ch: main
  - wait: {for: "img.hero", max: 3000}
  - ch: footer
"##,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::yaml_layer::service::YamlLayer;
    use std::collections::BTreeMap;

    fn layer() -> YamlLayer {
        YamlLayer::default().with_env(BTreeMap::new())
    }

    #[test]
    fn every_built_in_template_validates_cleanly() {
        let library = TemplateLibrary::built_in();
        for template in library.templates() {
            let generated = generate(&library, "Example flow", Some(&template.name)).expect("generated");
            let loaded = layer().load(&generated.yaml, None).expect("loaded");
            let report = layer().validate(&loaded);
            assert!(report.ok, "{}: {:?}", template.name, report.errors);
            assert!(report.warnings.is_empty(), "{}: {:?}", template.name, report.warnings);
            assert_eq!(loaded.normalized.document.name, "Example flow");
        }
    }

    #[test]
    fn prompts_pick_templates_by_whole_words() {
        let library = TemplateLibrary::built_in();
        let pick = |prompt: &str| library.match_prompt(prompt).map(|t| t.name.clone());
        assert_eq!(pick("Test the Login page"), Some("login".to_string()));
        assert_eq!(pick("user registration flow"), Some("form".to_string()));
        assert_eq!(pick("checkout with a saved card"), Some("purchase".to_string()));
        assert_eq!(pick("verify the notification badge"), None);
    }

    #[test]
    fn unmatched_prompts_get_a_skeleton() {
        let library = TemplateLibrary::built_in();
        let generated = generate(&library, "verify the notification badge", None).expect("generated");
        assert_eq!(generated.template, None);
        assert!(generated.yaml.starts_with("test: \"verify the notification badge\"\n"));
        let report = layer().validate(&layer().load(&generated.yaml, None).expect("loaded"));
        assert!(report.ok);
    }

    #[test]
    fn unknown_template_names_the_available_ones() {
        let err = generate(&TemplateLibrary::built_in(), "x", Some("nope")).expect_err("unknown");
        assert_eq!(err.code, "YAML-GEN-001");
        assert!(err.recovery_suggestions[0].contains("login"));
    }

    #[test]
    fn workspace_templates_override_built_ins() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let templates = dir.path().join(".stepline/templates");
        fs::create_dir_all(&templates).expect("dirs");
        fs::write(
            templates.join("login.yaml"),
            "test: Old title\ndesc: SSO login\nnav: https://sso.example.test\ndo:\n  - ch: Signed in\n",
        )
        .expect("write");
        let library = TemplateLibrary::with_workspace(dir.path()).expect("library");
        assert_eq!(library.get("login").map(|t| t.description.as_str()), Some("SSO login"));
        assert_eq!(library.by_tag("workspace").len(), 1);
        let generated = generate(&library, "SSO", Some("login")).expect("generated");
        assert!(!generated.yaml.contains("Old title"));
    }

    #[test]
    fn suggestions_flag_fixed_waits_and_repeated_selectors() {
        let yaml = "test: x\ndo:\n  - wait: 2000\n  - c: \"#go\"\n  - c: \"#go\"\n  - c: \"#go\"\n  - c: \"#go\"\n";
        let advice = suggestions(yaml);
        assert!(advice.iter().any(|line| line.contains("'#go' is used 4 times")));
        assert!(advice.iter().any(|line| line.contains("fixed delay")));
        assert!(suggestions(&TemplateLibrary::built_in().templates()[0].body).is_empty());
    }
}
