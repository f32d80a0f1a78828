//! Predefined template catalog and renderer.
//!
//! Templates are immutable, compiled on first use into a segment list, and
//! cached keyed by id. Compilation may race under concurrent first use;
//! that is acceptable because every compilation of the same template yields
//! the same segments, so the cache converges regardless of which writer
//! wins.
//!
//! Substitution is deterministic: `{{name}}` placeholders are replaced with
//! the caller-supplied variable, and an absent variable renders as the empty
//! string, so no unresolved placeholder token ever survives rendering.

use std::sync::Arc;

use ahash::AHashMap;
use dashmap::DashMap;
use phf::phf_map;
use serde::Serialize;
use serde_json::Value;

/// An immutable template definition.
#[derive(Debug, Clone, Copy)]
pub struct TemplateDef {
    pub name: &'static str,
    pub description: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
    pub variables: &'static [&'static str],
}

static TEMPLATES: phf::Map<&'static str, TemplateDef> = phf_map! {
    "welcome" => TemplateDef {
        name: "Welcome",
        description: "Welcome email for new users",
        subject: "Bienvenido a {{empresa}}",
        body: "<html><body>\
            <h1>¡Bienvenido a {{empresa}}!</h1>\
            <p>Hola <strong>{{nombre}}</strong>, tu cuenta ha sido creada.</p>\
            <p><a href=\"{{enlace}}\">Activar mi cuenta</a></p>\
            </body></html>",
        variables: &["nombre", "empresa", "enlace"],
    },
    "password_reset" => TemplateDef {
        name: "Reset Password",
        description: "Password reset email",
        subject: "Restablecer tu contraseña - {{empresa}}",
        body: "<html><body>\
            <h1>Restablecer Contraseña</h1>\
            <p>Hola <strong>{{nombre}}</strong>, usa este código para continuar:</p>\
            <p><span>{{codigo}}</span></p>\
            <p>Este código expira en {{expira}} minutos.</p>\
            </body></html>",
        variables: &["nombre", "codigo", "expira", "empresa"],
    },
    "invoice" => TemplateDef {
        name: "Invoice",
        description: "Invoice or payment receipt email",
        subject: "Factura #{{numero}} - {{empresa}}",
        body: "<html><body>\
            <h1>Factura #{{numero}}</h1>\
            <p>Hola <strong>{{nombre}}</strong>, gracias por tu pago.</p>\
            <p>Concepto: {{concepto}}</p>\
            <p>Fecha: {{fecha}}</p>\
            <p>Total: {{monto}}</p>\
            <p><a href=\"{{enlace}}\">Descargar Factura PDF</a></p>\
            </body></html>",
        variables: &["nombre", "numero", "monto", "fecha", "concepto", "empresa", "enlace"],
    },
    "notification" => TemplateDef {
        name: "Notification",
        description: "General notification email",
        subject: "{{titulo}} - {{empresa}}",
        body: "<html><body>\
            <h1>{{titulo}}</h1>\
            <p>Hola <strong>{{nombre}}</strong>,</p>\
            <p>{{mensaje}}</p>\
            <p><a href=\"{{enlace}}\">Ver más detalles</a></p>\
            </body></html>",
        variables: &["nombre", "titulo", "mensaje", "enlace", "empresa"],
    },
    "otp" => TemplateDef {
        name: "OTP Code",
        description: "One-time verification code email",
        subject: "Tu código de verificación - {{empresa}}",
        body: "<html><body>\
            <h1>Código de Verificación</h1>\
            <p>Hola <strong>{{nombre}}</strong>, tu código es:</p>\
            <p><span>{{codigo}}</span></p>\
            <p>Este código expira en {{expira}} minutos.</p>\
            </body></html>",
        variables: &["nombre", "codigo", "expira", "empresa"],
    },
};

/// One piece of a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// Compiled representation of one template's subject and body.
#[derive(Debug)]
struct Compiled {
    subject: Vec<Segment>,
    body: Vec<Segment>,
}

/// Split template text into literal and variable segments.
fn compile(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        if let Some(close) = rest[open..].find("}}") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let name = rest[open + 2..open + close].trim().to_string();
            segments.push(Segment::Variable(name));
            rest = &rest[open + close + 2..];
        } else {
            break;
        }
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    segments
}

/// Render a variable value the way a template engine would: strings as-is,
/// other scalars via their JSON rendering, absent values as empty.
fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn substitute(segments: &[Segment], variables: &AHashMap<String, Value>) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Variable(name) => out.push_str(&render_value(variables.get(name))),
        }
    }
    out
}

/// Subject and body produced by rendering a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub html: String,
}

/// Catalog entry surfaced to callers listing the available templates.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TemplateInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub variables: &'static [&'static str],
}

/// Template renderer with a process-scoped compilation cache.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    compiled: DashMap<&'static str, Arc<Compiled>>,
}

impl TemplateRegistry {
    /// Create a registry with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, id: &str) -> Option<Arc<Compiled>> {
        if let Some(cached) = self.compiled.get(id) {
            return Some(Arc::clone(cached.value()));
        }

        let (key, def) = TEMPLATES.get_entry(id)?;
        let compiled = Arc::new(Compiled {
            subject: compile(def.subject),
            body: compile(def.body),
        });
        self.compiled.insert(*key, Arc::clone(&compiled));
        Some(compiled)
    }

    /// Render a template with the given variables.
    ///
    /// Returns `None` for an unknown template id; the caller maps this to a
    /// not-found response.
    #[must_use]
    pub fn render(
        &self,
        id: &str,
        variables: &AHashMap<String, Value>,
    ) -> Option<RenderedTemplate> {
        let compiled = self.compiled(id)?;
        Some(RenderedTemplate {
            subject: substitute(&compiled.subject, variables),
            html: substitute(&compiled.body, variables),
        })
    }

    /// `true` if the template id exists.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        TEMPLATES.contains_key(id)
    }

    /// The variables a template expects, or `None` for an unknown id.
    #[must_use]
    pub fn variables(&self, id: &str) -> Option<&'static [&'static str]> {
        TEMPLATES.get(id).map(|def| def.variables)
    }

    /// All available templates.
    #[must_use]
    pub fn list(&self) -> Vec<TemplateInfo> {
        let mut templates: Vec<TemplateInfo> = TEMPLATES
            .entries()
            .map(|(id, def)| TemplateInfo {
                id: *id,
                name: def.name,
                description: def.description,
                variables: def.variables,
            })
            .collect();
        templates.sort_by_key(|info| info.id);
        templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> AHashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
            .collect()
    }

    #[test]
    fn test_compile_segments() {
        let segments = compile("Hola {{nombre}}, bienvenido a {{empresa}}.");
        assert_eq!(
            segments,
            vec![
                Segment::Literal("Hola ".to_string()),
                Segment::Variable("nombre".to_string()),
                Segment::Literal(", bienvenido a ".to_string()),
                Segment::Variable("empresa".to_string()),
                Segment::Literal(".".to_string()),
            ]
        );
    }

    #[test]
    fn test_render_substitutes_every_placeholder() {
        let registry = TemplateRegistry::new();
        let rendered = registry
            .render(
                "welcome",
                &vars(&[
                    ("empresa", "Acme"),
                    ("nombre", "Ana"),
                    ("enlace", "https://x"),
                ]),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Bienvenido a Acme");
        assert!(rendered.html.contains("Ana"));
        assert!(rendered.html.contains("https://x"));
        assert!(!rendered.subject.contains("{{"));
        assert!(!rendered.html.contains("{{"));
    }

    #[test]
    fn test_unknown_template_is_none() {
        let registry = TemplateRegistry::new();
        assert!(registry.render("missing_id", &AHashMap::new()).is_none());
        assert!(!registry.exists("missing_id"));
    }

    #[test]
    fn test_missing_variable_renders_empty() {
        let registry = TemplateRegistry::new();
        let rendered = registry
            .render("welcome", &vars(&[("empresa", "Acme")]))
            .unwrap();
        assert!(!rendered.html.contains("{{"));
        assert!(!rendered.html.contains("}}"));
    }

    #[test]
    fn test_non_string_variables_are_stringified() {
        let registry = TemplateRegistry::new();
        let mut variables = AHashMap::new();
        variables.insert("empresa".to_string(), Value::String("Acme".to_string()));
        variables.insert("numero".to_string(), Value::from(42));
        variables.insert("monto".to_string(), Value::String("$10".to_string()));
        variables.insert("nombre".to_string(), Value::String("Ana".to_string()));

        let rendered = registry.render("invoice", &variables).unwrap();
        assert_eq!(rendered.subject, "Factura #42 - Acme");
    }

    #[test]
    fn test_compilation_is_cached() {
        let registry = TemplateRegistry::new();
        registry.render("otp", &AHashMap::new()).unwrap();
        assert!(registry.compiled.contains_key("otp"));

        // A second render reuses the cached compilation
        let first = Arc::as_ptr(&registry.compiled("otp").unwrap());
        let second = Arc::as_ptr(&registry.compiled("otp").unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_catalog_listing() {
        let registry = TemplateRegistry::new();
        let templates = registry.list();
        assert_eq!(templates.len(), 5);
        assert_eq!(templates[0].id, "invoice");
        assert_eq!(
            registry.variables("welcome"),
            Some(&["nombre", "empresa", "enlace"][..])
        );
        assert!(registry.variables("missing_id").is_none());
    }
}
