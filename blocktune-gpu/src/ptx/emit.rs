//! PTX text checks
//!
//! Cheap structural validation of emitted PTX before it is handed to the
//! driver's JIT.

/// Validate emitted PTX for basic syntax errors
pub fn validate_ptx(ptx: &str) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    for directive in [".version", ".target", ".address_size"] {
        if !ptx.contains(directive) {
            errors.push(format!("Missing {} directive", directive));
        }
    }

    let open_braces = ptx.matches('{').count();
    let close_braces = ptx.matches('}').count();
    if open_braces != close_braces {
        errors.push(format!(
            "Unbalanced braces: {} open, {} close",
            open_braces, close_braces
        ));
    }

    let open_parens = ptx.matches('(').count();
    let close_parens = ptx.matches(')').count();
    if open_parens != close_parens {
        errors.push(format!(
            "Unbalanced parentheses: {} open, {} close",
            open_parens, close_parens
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
