use crate::domain::models::Contact;

/// Substitutes `{{token}}` and `{{token|fallback}}` placeholders with
/// contact attributes. Known tokens: `email`, `first_name`, `last_name`,
/// `full_name`, `company` and `custom.<key>`. An unknown or empty token
/// renders its fallback, or nothing.
pub fn render_template(template: &str, contact: &Contact) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                out.push_str(&resolve_token(after[..close].trim(), contact));
                rest = &after[close + 2..];
            }
            None => {
                // Unterminated placeholder, emit verbatim.
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_token(token: &str, contact: &Contact) -> String {
    let (name, fallback) = match token.split_once('|') {
        Some((name, fallback)) => (name.trim(), fallback.trim()),
        None => (token, ""),
    };

    let value = match name {
        "email" => Some(contact.email.clone()),
        "first_name" => contact.first_name.clone(),
        "last_name" => contact.last_name.clone(),
        "company" => contact.company.clone(),
        "full_name" => match (&contact.first_name, &contact.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        },
        _ => name
            .strip_prefix("custom.")
            .and_then(|key| contact.custom_fields.get(key).cloned()),
    };

    match value {
        Some(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn contact() -> Contact {
        let mut custom_fields = HashMap::new();
        custom_fields.insert("role".to_string(), "CTO".to_string());
        Contact {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: None,
            company: Some("Analytical Engines".to_string()),
            custom_fields,
            timezone: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn substitutes_known_tokens() {
        let rendered = render_template(
            "Hi {{first_name}}, saw {{company}} is hiring a {{custom.role}}",
            &contact(),
        );
        assert_eq!(rendered, "Hi Ada, saw Analytical Engines is hiring a CTO");
    }

    #[test]
    fn missing_value_uses_fallback() {
        let rendered = render_template("Hey {{last_name|there}}", &contact());
        assert_eq!(rendered, "Hey there");
    }

    #[test]
    fn missing_value_without_fallback_renders_empty() {
        let rendered = render_template("Hey {{last_name}}!", &contact());
        assert_eq!(rendered, "Hey !");
    }

    #[test]
    fn full_name_collapses_missing_parts() {
        let rendered = render_template("{{full_name}}", &contact());
        assert_eq!(rendered, "Ada");
    }

    #[test]
    fn unterminated_placeholder_is_left_verbatim() {
        let rendered = render_template("broken {{first_name", &contact());
        assert_eq!(rendered, "broken {{first_name");
    }
}
