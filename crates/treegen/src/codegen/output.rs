//! Formatting and file output for the generated modules.

use std::fs;
use std::path::Path;

use proc_macro2::TokenStream;
use tracing::debug;

use super::CodeGenerator;
use crate::error::{Result, TreeGenError};

impl<'m> CodeGenerator<'m> {
    /// Renders a token stream into a formatted source file with the
    /// generated-file banner and any verbatim splices from the header.
    fn render(&self, tokens: TokenStream, splices: &[String]) -> Result<String> {
        let file: syn::File =
            syn::parse2(tokens).map_err(|source| TreeGenError::Format { source })?;
        let formatted = prettyplease::unparse(&file);

        let mut out = String::new();
        out.push_str(&format!(
            "// @generated by tree-gen from {}. DO NOT EDIT.\n//\n// Any manual changes will be overwritten on the next regeneration.\n\n",
            self.source_name
        ));
        for splice in splices {
            out.push_str(splice);
            out.push('\n');
        }
        if !splices.is_empty() {
            out.push('\n');
        }
        out.push_str(&formatted);
        Ok(out)
    }

    /// Generates and writes the types and impls modules, plus the Python
    /// module when requested.
    pub fn write_outputs(
        &self,
        header_out: &Path,
        source_out: &Path,
        dynamic_out: Option<&Path>,
    ) -> Result<()> {
        let types_module = module_stem(header_out);

        let types = self.render(self.types_tokens()?, &self.model.includes)?;
        let impls = self.render(
            self.impls_tokens(&types_module)?,
            &self.model.src_includes,
        )?;

        write_file(header_out, &types)?;
        write_file(source_out, &impls)?;
        debug!(
            header = %header_out.display(),
            source = %source_out.display(),
            "wrote native model"
        );

        if let Some(dynamic_out) = dynamic_out {
            let python = self.python_text()?;
            write_file(dynamic_out, &python)?;
            debug!(dynamic = %dynamic_out.display(), "wrote dynamic model");
        }
        Ok(())
    }
}

/// Module name a generated file will be mounted under, from its stem.
fn module_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("types");
    super::names::sanitize_name(stem)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, contents)?;
    Ok(())
}
