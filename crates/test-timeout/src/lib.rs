//! Deadline guards for tests. A hung pairing test would otherwise stall the
//! whole suite, so every test in this workspace carries one of these
//! attributes instead of a bare `#[test]`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn parse_timeout_secs(attr: TokenStream) -> u64 {
    if attr.is_empty() {
        return DEFAULT_TIMEOUT_SECS;
    }
    let lit = syn::parse::<LitInt>(attr).expect("timeout takes an integer number of seconds");
    let secs: u64 = lit
        .base10_parse()
        .unwrap_or_else(|err| panic!("invalid timeout value: {err}"));
    assert!(secs > 0, "timeout must be greater than zero");
    secs
}

fn strip_attr(attrs: Vec<Attribute>, path: &[&str]) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let segments: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|s| s.ident.to_string())
                .collect();
            segments != path
        })
        .collect()
}

/// Guard a synchronous test with a wall-clock deadline. The body runs on a
/// helper thread; the test thread waits on a completion channel and fails the
/// test if the deadline passes first.
///
/// ```ignore
/// #[test_timeout::timeout]        // 30s default
/// #[test_timeout::timeout(5)]     // explicit seconds
/// ```
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = parse_timeout_secs(attr);

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout guards a synchronous test; use tokio_timeout_test for async",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip_attr(attrs, &["test"]);

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);
            let worker = std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #block));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(deadline) {
                Ok(Ok(_)) => {
                    let _ = worker.join();
                }
                Ok(Err(panic_payload)) => {
                    let _ = worker.join();
                    std::panic::resume_unwind(panic_payload);
                }
                Err(_) => panic!("test exceeded {}s deadline", #secs),
            }
        }
    })
}

/// Guard an async test with a wall-clock deadline. Expands to a plain
/// `#[test]` that drives the body on a two-worker tokio runtime under
/// `tokio::time::timeout`, so a stalled await fails instead of hanging.
///
/// ```ignore
/// #[test_timeout::tokio_timeout_test]
/// async fn pairs_two_clients() { .. }
/// ```
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = parse_timeout_secs(attr);

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test requires an async function",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = strip_attr(attrs, &["tokio", "test"]);

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("failed to build tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(
                    std::time::Duration::from_secs(#secs),
                    async move #block,
                )
                .await
                .unwrap_or_else(|_| panic!("test exceeded {}s deadline", #secs));
            });
        }
    })
}
