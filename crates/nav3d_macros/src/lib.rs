use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, FnArg, Ident, ItemFn, Pat};

/// Time a search or build function when the `perf_stats` feature is enabled.
///
/// The function body is wrapped with a drop guard that logs the elapsed time
/// when it exceeds the threshold. With the feature disabled nothing is emitted.
///
/// # Features
/// - Auto-detects `start` and `end`/`goal` parameters of type `Vec3` and adds
///   them to the log line, so slow queries can be replayed
/// - Uses Bevy's `info!` logging
/// - Zero-cost when the feature is disabled
///
/// # Example
/// ```ignore
/// #[profile(2)] // threshold in milliseconds, default 1
/// pub fn find_path(&mut self, start: Vec3, end: Vec3) -> Option<OctreePath> {
///     // ... search ...
/// }
/// ```
#[proc_macro_attribute]
pub fn profile(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let threshold_ms: u128 = if attr.is_empty() {
        1
    } else {
        attr.to_string().parse().unwrap_or(1)
    };

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let fn_name_str = sig.ident.to_string();

    let endpoint = |names: &[&str]| -> Option<Ident> {
        sig.inputs.iter().find_map(|arg| {
            let FnArg::Typed(pat_type) = arg else {
                return None;
            };
            let Pat::Ident(pat_ident) = &*pat_type.pat else {
                return None;
            };
            let ty = &pat_type.ty;
            let type_str = quote!(#ty).to_string();
            if names.iter().any(|n| pat_ident.ident == n) && type_str.contains("Vec3") {
                Some(pat_ident.ident.clone())
            } else {
                None
            }
        })
    };

    let guard = match (endpoint(&["start"]), endpoint(&["end", "goal"])) {
        (Some(from), Some(to)) => quote! {
            struct ProfileGuard {
                name: &'static str,
                start: std::time::Instant,
                from: bevy::math::Vec3,
                to: bevy::math::Vec3,
            }
            impl Drop for ProfileGuard {
                fn drop(&mut self) {
                    let elapsed = self.start.elapsed();
                    if elapsed.as_millis() > #threshold_ms {
                        bevy::prelude::info!(
                            "[PERF] {}: {:?} ({:?} -> {:?})",
                            self.name, elapsed, self.from, self.to
                        );
                    }
                }
            }
            ProfileGuard {
                name: #fn_name_str,
                start: std::time::Instant::now(),
                from: #from,
                to: #to,
            }
        },
        _ => quote! {
            struct ProfileGuard {
                name: &'static str,
                start: std::time::Instant,
            }
            impl Drop for ProfileGuard {
                fn drop(&mut self) {
                    let elapsed = self.start.elapsed();
                    if elapsed.as_millis() > #threshold_ms {
                        bevy::prelude::info!("[PERF] {}: {:?}", self.name, elapsed);
                    }
                }
            }
            ProfileGuard {
                name: #fn_name_str,
                start: std::time::Instant::now(),
            }
        },
    };

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            #[cfg(feature = "perf_stats")]
            let _profile_timer = {
                #guard
            };

            #block
        }
    };

    output.into()
}
