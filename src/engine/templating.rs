use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::contact::Contact;

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script pattern is valid")
});

/// Substitutes contact placeholders in a message template.
///
/// Only `firstName`, `lastName`, `email` and `phone` are recognised; blanks
/// inside the braces are ignored. A recognised field the contact lacks
/// renders as the empty string. Any other `{{ ... }}` is kept verbatim.
pub(crate) fn render_message(template: &str, contact: Option<&Contact>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        if let Some(end_rel) = tail.find("}}") {
            let (expr_with, new_rest) = tail.split_at(end_rel + 2);
            let expr = expr_with
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim();
            match contact_field(expr, contact) {
                Some(value) => out.push_str(value),
                None => out.push_str(expr_with),
            }
            rest = new_rest;
        } else {
            out.push_str(tail);
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    out
}

/// `None` means the placeholder is not a contact field at all.
fn contact_field<'a>(name: &str, contact: Option<&'a Contact>) -> Option<&'a str> {
    let value = match name {
        "firstName" => contact.and_then(|c| c.first_name.as_deref()),
        "lastName" => contact.and_then(|c| c.last_name.as_deref()),
        "email" => contact.and_then(|c| c.email.as_deref()),
        "phone" => contact.and_then(|c| c.phone.as_deref()),
        _ => return None,
    };
    Some(value.unwrap_or_default())
}

/// Drops `<script>` blocks and trims the result.
pub(crate) fn sanitize(input: &str) -> String {
    SCRIPT_BLOCK.replace_all(input, "").trim().to_string()
}

pub(crate) fn render_and_sanitize(template: &str, contact: Option<&Contact>) -> String {
    sanitize(&render_message(template, contact))
}
