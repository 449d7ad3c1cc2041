use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse::Parser, parse_macro_input, FnArg, GenericArgument, ItemFn, Meta, PathArguments,
    ReturnType, Type,
};

/// Procedural macro to run an async function at most once per token through an
/// `IdempotencyGuard`.
///
/// # Example
///
/// ```rust,ignore
/// #[run_once(guard = self.guard, token = code.as_str())]
/// async fn exchange(&self, code: String) -> Result<Session, OAuthError> {
///     // Exchange the authorization code here
///     Ok(Session::new())
/// }
/// ```
///
/// The function's declared return type `Result<T, E>` becomes
/// `Result<T, lethe_rs::Error<E>>` and the body runs inside
/// `guard.run(token, || async move { ... })`.
///
/// # Requirements
///
/// - The function must be `async`
/// - The function must return `Result<T, E>` written with both type arguments
/// - The `guard` expression must be a place whose reference derefs to `IdempotencyGuard`
/// - The `token` expression must evaluate to a type that implements `Into<Token>`;
///   it is converted before the body takes ownership of the parameters
#[proc_macro_attribute]
pub fn run_once(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let parser = syn::punctuated::Punctuated::<Meta, syn::Token![,]>::parse_terminated;
    let args = match parser.parse(attr) {
        Ok(args) => args,
        Err(e) => return e.to_compile_error().into(),
    };

    let mut guard_expr = None;
    let mut token_expr = None;

    for arg in args {
        match arg {
            Meta::NameValue(nv) => {
                let name = nv.path.get_ident().map(|i| i.to_string());
                match name.as_deref() {
                    Some("guard") => {
                        guard_expr = Some(nv.value);
                    }
                    Some("token") => {
                        token_expr = Some(nv.value);
                    }
                    _ => {
                        return syn::Error::new_spanned(
                            nv.path,
                            "Unknown attribute parameter. Expected 'guard' or 'token'",
                        )
                        .to_compile_error()
                        .into();
                    }
                }
            }
            _ => {
                return syn::Error::new_spanned(
                    arg,
                    "Expected name-value pair like `guard = self.guard` or `token = code.as_str()`",
                )
                .to_compile_error()
                .into();
            }
        }
    }

    let guard = match guard_expr {
        Some(expr) => expr,
        None => {
            return syn::Error::new(
                proc_macro2::Span::call_site(),
                "Missing required 'guard' parameter",
            )
            .to_compile_error()
            .into();
        }
    };

    let token = match token_expr {
        Some(expr) => expr,
        None => {
            return syn::Error::new(
                proc_macro2::Span::call_site(),
                "Missing required 'token' parameter",
            )
            .to_compile_error()
            .into();
        }
    };

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "The #[run_once] macro can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    let fn_vis = &input.vis;
    let fn_name = &input.sig.ident;
    let fn_generics = &input.sig.generics;
    let fn_where = &input.sig.generics.where_clause;
    let fn_inputs = &input.sig.inputs;
    let fn_block = &input.block;
    let fn_attrs = &input.attrs;

    // Rebound inside the async block so the body owns them
    let param_names: Vec<_> = fn_inputs
        .iter()
        .filter_map(|arg| {
            if let FnArg::Typed(pat_type) = arg {
                if let syn::Pat::Ident(pat_ident) = &*pat_type.pat {
                    return Some(&pat_ident.ident);
                }
            }
            None
        })
        .collect();

    let (ok_type, err_type) = match &input.sig.output {
        ReturnType::Type(_, ty) => match result_arguments(ty) {
            Some(types) => types,
            None => {
                return syn::Error::new_spanned(ty, "Function must return Result<T, E>")
                    .to_compile_error()
                    .into();
            }
        },
        ReturnType::Default => {
            return syn::Error::new_spanned(&input.sig, "Function must return Result<T, E>")
                .to_compile_error()
                .into();
        }
    };

    let expanded = quote! {
        #(#fn_attrs)*
        #fn_vis async fn #fn_name #fn_generics(#fn_inputs)
            -> ::core::result::Result<#ok_type, ::lethe_rs::Error<#err_type>>
            #fn_where
        {
            let __lethe_token: ::lethe_rs::Token = ::core::convert::Into::into(#token);
            let __lethe_guard = &#guard;

            __lethe_guard.run(__lethe_token, || async move {
                #(let #param_names = #param_names;)*
                let __lethe_result: ::core::result::Result<#ok_type, #err_type> = #fn_block;
                __lethe_result
            }).await
        }
    };

    TokenStream::from(expanded)
}

/// Split `Result<T, E>` (under any path) into `T` and `E`
fn result_arguments(ty: &Type) -> Option<(&Type, &Type)> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };

    let mut types = arguments.args.iter().filter_map(|arg| match arg {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
    });
    let ok = types.next()?;
    let err = types.next()?;
    if types.next().is_some() {
        return None;
    }
    Some((ok, err))
}
