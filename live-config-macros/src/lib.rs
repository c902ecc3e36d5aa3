//! Proc macros for the live-config crate.
//!
//! This crate provides the `#[derive(Config)]` macro

use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, Expr, Lit, parse_macro_input, spanned::Spanned};

/// Configuration options parsed from `#[config(...)]` attribute.
struct ConfigOptions {
    version: (u64, u64, u64),
    file_name: Option<String>,
}

impl ConfigOptions {
    fn from_attrs(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut version = None;
        let mut file_name = None;

        for attr in attrs {
            if attr.path().is_ident("config") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("version") {
                        let value: Expr = meta.value()?.parse()?;
                        if let Expr::Lit(expr_lit) = value {
                            if let Lit::Str(lit_str) = expr_lit.lit {
                                version = Some(parse_version(&lit_str)?);
                            } else {
                                return Err(syn::Error::new(
                                    expr_lit.span(),
                                    "version must be a string like \"1.0.0\"",
                                ));
                            }
                        } else {
                            return Err(syn::Error::new(value.span(), "version must be a literal"));
                        }
                    } else if meta.path.is_ident("file_name") {
                        let value: Expr = meta.value()?.parse()?;
                        if let Expr::Lit(expr_lit) = value {
                            if let Lit::Str(lit_str) = expr_lit.lit {
                                file_name = Some(lit_str.value());
                            } else {
                                return Err(syn::Error::new(
                                    expr_lit.span(),
                                    "file_name must be a string",
                                ));
                            }
                        } else {
                            return Err(syn::Error::new(
                                value.span(),
                                "file_name must be a literal",
                            ));
                        }
                    } else {
                        return Err(syn::Error::new(
                            meta.path.span(),
                            format!("unknown config attribute: {:?}", meta.path.get_ident()),
                        ));
                    }
                    Ok(())
                })?;
            }
        }

        let version = version.ok_or_else(|| {
            syn::Error::new(
                proc_macro2::Span::call_site(),
                "missing required attribute: #[config(version = \"...\")]",
            )
        })?;

        Ok(Self { version, file_name })
    }
}

/// Parses a `major.minor.patch` version literal at expansion time, so
/// malformed versions fail the build instead of the first load.
fn parse_version(lit: &syn::LitStr) -> syn::Result<(u64, u64, u64)> {
    let text = lit.value();
    let mut parts = text.split('.').map(|part| {
        if part.bytes().all(|byte| byte.is_ascii_digit()) {
            part.parse::<u64>().ok()
        } else {
            None
        }
    });
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Some(major)), Some(Some(minor)), Some(Some(patch)), None) => {
            Ok((major, minor, patch))
        }
        _ => Err(syn::Error::new(
            lit.span(),
            "version must be `major.minor.patch`, e.g. \"2.1.0\"",
        )),
    }
}

/// Derive macro for the `Config` trait.
///
/// Takes the schema version (required) and the document's file name
/// (optional, defaulting to the lowercased type name plus `.toml`) from the
/// `#[config(...)]` attribute.
///
/// # Example
///
/// ```ignore
/// use live_config::Config;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Default, Clone, Serialize, Deserialize, Config)]
/// #[config(version = "1.0.0", file_name = "app.toml")]
/// struct AppConfig {
///     name: String,
///     port: u16,
/// }
/// ```
///
/// This expands to roughly:
///
/// ```ignore
/// // ... your struct with serde derives ...
///
/// impl ::live_config::Config for AppConfig {
///     const CURRENT_VERSION: ::live_config::SchemaVersion =
///         ::live_config::SchemaVersion::new(1, 0, 0);
///     const FILE_NAME: &'static str = "app.toml";
/// }
/// ```
#[proc_macro_derive(Config, attributes(config))]
pub fn derive_config(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_config_impl(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_config_impl(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let options = ConfigOptions::from_attrs(&input.attrs)?;
    let name = &input.ident;
    let (major, minor, patch) = options.version;
    let file_name = options
        .file_name
        .unwrap_or_else(|| format!("{}.toml", name.to_string().to_lowercase()));

    let config_impl = quote! {
        impl ::live_config::Config for #name {
            const CURRENT_VERSION: ::live_config::SchemaVersion =
                ::live_config::SchemaVersion::new(#major, #minor, #patch);
            const FILE_NAME: &'static str = #file_name;
        }
    };

    Ok(config_impl)
}
