use heck::ToSnakeCase;
use proc_macro2::Span;

/// Sanitize a string to be safe for identifiers and filenames
pub(crate) fn sanitize_name(s: &str) -> String {
    if s.is_empty() {
        return "unknown".to_string();
    }

    let mut sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
    {
        sanitized = format!("_{}", sanitized);
    }

    sanitized
}

/// Create an identifier, using a raw identifier if necessary for keywords
pub(crate) fn make_ident(s: &str) -> syn::Ident {
    let sanitized = sanitize_name(s);
    syn::parse_str::<syn::Ident>(&sanitized)
        .unwrap_or_else(|_| syn::Ident::new_raw(&sanitized, Span::call_site()))
}

/// Identifier for a declared type, kept exactly as written in the input.
pub(crate) fn type_ident(name: &str) -> syn::Ident {
    make_ident(name)
}

/// Identifier for the borrowed-view enum of an abstract type.
pub(crate) fn ref_ident(name: &str) -> syn::Ident {
    make_ident(&format!("{name}Ref"))
}

/// `prefix_snake_case_name` method identifier, e.g. `is_binary_op`.
pub(crate) fn method_name(prefix: &str, type_name: &str) -> syn::Ident {
    make_ident(&format!("{prefix}_{}", type_name.to_snake_case()))
}
