//! JSON-LD `@type` collection.

use serde_json::Value;

/// Nesting below this depth is ignored
pub const MAX_DEPTH: usize = 32;

/// Collect every `@type` in a JSON-LD document, including nested nodes and
/// `@graph` arrays. Types are returned once each, in first-seen order.
pub fn collect_types(document: &Value) -> Vec<String> {
    let mut types = Vec::new();
    visit(document, 0, &mut types);
    types
}

fn visit(value: &Value, depth: usize, types: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }

    match value {
        Value::Array(items) => {
            for item in items {
                visit(item, depth + 1, types);
            }
        }
        Value::Object(node) => {
            if let Some(declared) = node.get("@type") {
                record(declared, types);
            }
            for (key, child) in node {
                if key != "@type" {
                    visit(child, depth + 1, types);
                }
            }
        }
        _ => {}
    }
}

fn record(declared: &Value, types: &mut Vec<String>) {
    let names: Vec<&str> = match declared {
        Value::String(name) => vec![name.as_str()],
        Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };

    for name in names {
        let name = name.trim();
        if !name.is_empty() && !types.iter().any(|t| t == name) {
            types.push(name.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_type() {
        let doc = json!({"@context": "https://schema.org", "@type": "Organization", "name": "Acme"});
        assert_eq!(collect_types(&doc), vec!["Organization"]);
    }

    #[test]
    fn test_graph_and_nested_types() {
        let doc = json!({
            "@context": "https://schema.org",
            "@graph": [
                {"@type": "WebSite", "publisher": {"@type": "Organization"}},
                {"@type": ["WebPage", "ItemPage"]},
                {"@type": "Organization"}
            ]
        });
        assert_eq!(
            collect_types(&doc),
            vec!["WebSite", "Organization", "WebPage", "ItemPage"]
        );
    }

    #[test]
    fn test_top_level_array() {
        let doc = json!([{"@type": "Product"}, {"@type": "BreadcrumbList"}, 42, null]);
        assert_eq!(collect_types(&doc), vec!["Product", "BreadcrumbList"]);
    }

    #[test]
    fn test_depth_bound() {
        let mut doc = json!({"@type": "Leaf"});
        for _ in 0..100 {
            doc = json!({"child": doc});
        }
        assert!(collect_types(&doc).is_empty());

        let shallow = json!({"a": {"b": {"@type": "Thing"}}});
        assert_eq!(collect_types(&shallow), vec!["Thing"]);
    }
}
