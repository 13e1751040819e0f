use proc_macro::TokenStream;
use quote::quote;
use syn::{Lit, LitInt};

/// Repeats the body of a test `N` times, for shaking out races.
///
/// ```ignore
/// #[test]
/// #[n_times(100)]
/// fn at_most_one_dequeue() { ... }
/// ```
#[proc_macro_attribute]
pub fn n_times(args: TokenStream, item: TokenStream) -> TokenStream {
    let fun = syn::parse_macro_input!(item as syn::ItemFn);
    let n = syn::parse_macro_input!(args as Lit);

    let n: usize = match parse_count(&n) {
        Ok(n) => n,
        Err(err) => return err.to_compile_error().into(),
    };

    let name = fun.sig.ident.clone();
    let args = fun.sig.inputs.clone();
    let body = fun.block.clone();
    let asyncness = fun.sig.asyncness;
    let visibility = &fun.vis;
    let attributes = fun.attrs;

    let new_fn = quote! {
        #(#attributes)*
        #visibility #asyncness fn #name(#args) {
            for _ in 0..#n {
                #body
            }
        }
    };

    new_fn.into()
}

fn parse_count(lit: &Lit) -> syn::Result<usize> {
    match lit {
        Lit::Int(n) => LitInt::base10_parse(n),
        other => Err(syn::Error::new_spanned(other, "N must be an integer")),
    }
}
