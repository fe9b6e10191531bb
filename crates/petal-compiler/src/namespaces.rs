use std::collections::BTreeMap;

use petal_parser::ElementNode;

pub const TAL_NS: &str = "http://xml.zope.org/namespaces/tal";
pub const METAL_NS: &str = "http://xml.zope.org/namespaces/metal";
pub const I18N_NS: &str = "http://xml.zope.org/namespaces/i18n";
pub const META_NS: &str = "http://xml.zope.org/namespaces/meta";
/// Engine default namespace, usable as an anonymous control prefix.
pub const PETAL_NS: &str = "http://pagetemplates.org/ns/petal";
pub const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

/// Namespaces whose attributes (and declarations) are stripped from
/// the output.
pub const CONTROL_NAMESPACES: &[&str] = &[TAL_NS, METAL_NS, I18N_NS, META_NS, PETAL_NS];

pub fn is_control_namespace(uri: &str) -> bool {
    CONTROL_NAMESPACES.contains(&uri)
}

/// Prefix-to-URI environment, extended per element by `xmlns:*`
/// declarations. The well-known control prefixes are pre-bound so
/// permissive HTML templates work without declarations.
#[derive(Debug, Clone)]
pub struct NamespaceEnv {
    bindings: BTreeMap<String, String>,
}

impl NamespaceEnv {
    pub fn root() -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert("tal".to_string(), TAL_NS.to_string());
        bindings.insert("metal".to_string(), METAL_NS.to_string());
        bindings.insert("i18n".to_string(), I18N_NS.to_string());
        bindings.insert("meta".to_string(), META_NS.to_string());
        bindings.insert("petal".to_string(), PETAL_NS.to_string());
        Self { bindings }
    }

    /// Child environment including this element's declarations.
    pub fn enter(&self, element: &ElementNode) -> Self {
        let mut bindings = self.bindings.clone();
        for attribute in &element.attributes {
            if let Some(prefix) = attribute.name.strip_prefix("xmlns:") {
                if let Some(value) = attribute.decoded_value() {
                    bindings.insert(prefix.to_string(), value);
                }
            }
        }
        Self { bindings }
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }
}
