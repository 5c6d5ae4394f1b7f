//! Procedural macros for spindle-rs.
//!
//! This crate provides the `#[spindle_rs::test]` attribute macro for writing
//! tests that run on a fresh spindle host.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn, Meta};

/// Configuration parsed from the macro attributes.
#[derive(Default)]
struct TestConfig {
    worker_threads: Option<usize>,
}

impl TestConfig {
    fn parse(attrs: &[Meta]) -> syn::Result<Self> {
        let mut config = Self::default();

        for meta in attrs {
            let Meta::NameValue(nv) = meta else {
                return Err(syn::Error::new_spanned(
                    meta,
                    "expected `key = value` format",
                ));
            };

            let ident = nv
                .path
                .get_ident()
                .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected identifier"))?;

            let value = match &nv.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Int(lit),
                    ..
                }) => lit.base10_parse::<usize>()?,
                _ => {
                    return Err(syn::Error::new_spanned(
                        &nv.value,
                        "expected integer literal",
                    ))
                }
            };

            match ident.to_string().as_str() {
                "worker_threads" => {
                    if value == 0 {
                        return Err(syn::Error::new_spanned(
                            &nv.value,
                            "`worker_threads` must be at least 1",
                        ));
                    }
                    config.worker_threads = Some(value);
                }
                _ => {
                    return Err(syn::Error::new_spanned(
                        ident,
                        format!("unknown attribute `{}`, expected `worker_threads`", ident),
                    ))
                }
            }
        }

        Ok(config)
    }
}

/// A test attribute macro that runs an async test body on a fresh `SpindleRuntime`.
///
/// The body runs inside `block_on`, so `spindle_rs::current_runtime()` and the
/// free `offload_*` functions work. After the body returns, the host keeps
/// dispatching until nothing is in flight, so every callback the test
/// submitted has run before the test ends.
///
/// # Default Configuration
///
/// - One dedicated worker thread per offloaded call
/// - Thread prefix `test-{function name}`
///
/// # Attributes
///
/// - `worker_threads = N` - Run offloaded work on a pool of N threads
///
/// # Examples
///
/// ```ignore
/// #[spindle_rs::test]
/// async fn test_offload() {
///     spindle_rs::offload_blocking(10, || println!("done")).unwrap();
/// }
///
/// #[spindle_rs::test(worker_threads = 4)]
/// async fn test_pooled() {
///     let rt = spindle_rs::current_runtime().unwrap();
///     assert_eq!(rt.executor_name(), "rayon");
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let attr_parser = syn::punctuated::Punctuated::<Meta, syn::Token![,]>::parse_terminated;
    let attrs = match syn::parse::Parser::parse(attr_parser, attr) {
        Ok(attrs) => attrs,
        Err(e) => return e.to_compile_error().into(),
    };

    let config = match TestConfig::parse(&attrs.into_iter().collect::<Vec<_>>()) {
        Ok(c) => c,
        Err(e) => return e.to_compile_error().into(),
    };

    match generate_test(input, config) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn generate_test(input: ItemFn, config: TestConfig) -> syn::Result<TokenStream2> {
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            sig.fn_token,
            "test function must be async",
        ));
    }
    if !sig.inputs.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "test function must not take arguments",
        ));
    }

    let fn_name = &sig.ident;

    let pool = config.worker_threads.map(|n| {
        quote! { .worker_threads(#n) }
    });

    let mut new_sig = sig.clone();
    new_sig.asyncness = None;

    let output = quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis #new_sig {
            let __spindle_runtime = ::spindle_rs::SpindleBuilder::new()
                .prefix(concat!("test-", stringify!(#fn_name)))
                #pool
                .build()
                .expect("failed to create test host");

            let __spindle_output = __spindle_runtime.block_on(async #block);
            __spindle_runtime.run_until_idle();
            __spindle_output
        }
    };

    Ok(output)
}
