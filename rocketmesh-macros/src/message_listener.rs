use std::collections::HashSet;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{
    parse_macro_input, Expr, ExprLit, ExprUnary, GenericArgument, ItemImpl, Lit, LitInt, LitStr, MetaNameValue,
    PathArguments, Token, Type, UnOp,
};

/// Parsed `#[message_listener(...)]` arguments
struct ListenerArgs {
    consumer_group: LitStr,
    topic: LitStr,
    /// Builder calls appended after `ListenerConfig::builder(group, topic)`
    setters: Vec<TokenStream2>,
}

impl Parse for ListenerArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let pairs = Punctuated::<MetaNameValue, Token![,]>::parse_terminated(input)?;

        let mut consumer_group = None;
        let mut topic = None;
        let mut setters = Vec::new();
        let mut seen = HashSet::new();

        for pair in pairs {
            let ident = pair
                .path
                .get_ident()
                .cloned()
                .ok_or_else(|| syn::Error::new_spanned(&pair.path, "expected an argument name"))?;
            let key = ident.to_string();
            if !seen.insert(key.clone()) {
                return Err(syn::Error::new_spanned(
                    &pair.path,
                    format!("duplicate message_listener argument `{}`", key),
                ));
            }

            let value = &pair.value;
            match key.as_str() {
                "consumer_group" => consumer_group = Some(lit_str(value)?),
                "topic" => topic = Some(lit_str(value)?),
                "name_server" | "selector_expression" | "charset" => {
                    let lit = lit_str(value)?;
                    setters.push(quote! { .#ident(#lit) });
                }
                "consume_mode" => {
                    let variant = match lit_str(value)?.value().to_lowercase().as_str() {
                        "concurrent" => quote! { Concurrent },
                        "ordered" | "orderly" => quote! { Ordered },
                        _ => return Err(syn::Error::new_spanned(value, "expected \"concurrent\" or \"ordered\"")),
                    };
                    setters.push(quote! { .consume_mode(::rocketmesh::ConsumeMode::#variant) });
                }
                "message_model" => {
                    let variant = match lit_str(value)?.value().to_lowercase().as_str() {
                        "clustering" => quote! { Clustering },
                        "broadcasting" => quote! { Broadcasting },
                        _ => {
                            return Err(syn::Error::new_spanned(
                                value,
                                "expected \"clustering\" or \"broadcasting\"",
                            ))
                        }
                    };
                    setters.push(quote! { .message_model(::rocketmesh::MessageModel::#variant) });
                }
                "consume_from_where" => {
                    let variant = match lit_str(value)?.value().to_lowercase().as_str() {
                        "last_offset" => quote! { LastOffset },
                        "first_offset" => quote! { FirstOffset },
                        _ => {
                            return Err(syn::Error::new_spanned(
                                value,
                                "expected \"last_offset\" or \"first_offset\"",
                            ))
                        }
                    };
                    setters.push(quote! { .consume_from_where(::rocketmesh::ConsumeFromWhere::#variant) });
                }
                "thread_pool_min" | "thread_pool_max" | "batch_max_size" | "max_reconsume_attempts" => {
                    let lit = lit_unsigned(value)?;
                    setters.push(quote! { .#ident(#lit) });
                }
                "next_attempt_delay_level" => {
                    let level = lit_signed(value)?;
                    setters.push(quote! { .next_attempt_delay_level(#level) });
                }
                "ordered_suspend_millis" => {
                    let lit = lit_unsigned(value)?;
                    setters.push(quote! { .ordered_suspend(::std::time::Duration::from_millis(#lit)) });
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        &pair.path,
                        format!("unknown message_listener argument `{}`", other),
                    ))
                }
            }
        }

        let consumer_group = consumer_group
            .ok_or_else(|| input.error("message_listener requires `consumer_group = \"...\"`"))?;
        let topic = topic.ok_or_else(|| input.error("message_listener requires `topic = \"...\"`"))?;

        Ok(ListenerArgs {
            consumer_group,
            topic,
            setters,
        })
    }
}

fn lit_str(expr: &Expr) -> syn::Result<LitStr> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Str(lit), .. }) => Ok(lit.clone()),
        _ => Err(syn::Error::new_spanned(expr, "expected a string literal")),
    }
}

fn lit_unsigned(expr: &Expr) -> syn::Result<LitInt> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Int(lit), .. }) => {
            lit.base10_parse::<u32>()?;
            Ok(lit.clone())
        }
        _ => Err(syn::Error::new_spanned(expr, "expected a non-negative integer literal")),
    }
}

fn lit_signed(expr: &Expr) -> syn::Result<TokenStream2> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Int(lit), .. }) => {
            lit.base10_parse::<i32>()?;
            Ok(quote! { #lit })
        }
        Expr::Unary(ExprUnary {
            op: UnOp::Neg(_), expr: inner, ..
        }) => match inner.as_ref() {
            Expr::Lit(ExprLit { lit: Lit::Int(lit), .. }) => {
                lit.base10_parse::<i32>()?;
                Ok(quote! { -#lit })
            }
            _ => Err(syn::Error::new_spanned(expr, "expected an integer literal")),
        },
        _ => Err(syn::Error::new_spanned(expr, "expected an integer literal")),
    }
}

/// Payload type declared as `MessageListener<T>`, if any
fn declared_payload(item: &ItemImpl) -> syn::Result<Option<Type>> {
    let (_, path, _) = item.trait_.as_ref().ok_or_else(|| {
        syn::Error::new_spanned(
            &item.self_ty,
            "#[message_listener] must be placed on an `impl MessageListener<T> for Type` block",
        )
    })?;
    let segment = path
        .segments
        .last()
        .filter(|segment| segment.ident == "MessageListener")
        .ok_or_else(|| syn::Error::new_spanned(path, "#[message_listener] expects a `MessageListener` impl"))?;

    match &segment.arguments {
        PathArguments::None => Ok(None),
        PathArguments::AngleBracketed(arguments) => Ok(arguments.args.iter().find_map(|argument| match argument {
            GenericArgument::Type(ty) => Some(ty.clone()),
            _ => None,
        })),
        PathArguments::Parenthesized(_) => Err(syn::Error::new_spanned(segment, "unexpected parenthesized arguments")),
    }
}

/// Implementation of #[message_listener] macro
pub fn impl_message_listener(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as ListenerArgs);
    let item = parse_macro_input!(input as ItemImpl);

    let payload = match declared_payload(&item) {
        Ok(Some(ty)) => quote! { #ty },
        Ok(None) => quote! { ::rocketmesh::ConsumedEnvelope },
        Err(err) => return err.to_compile_error().into(),
    };

    let self_ty = &item.self_ty;
    let (impl_generics, _, where_clause) = item.generics.split_for_impl();
    let consumer_group = &args.consumer_group;
    let topic = &args.topic;
    let setters = &args.setters;

    let expanded = quote! {
        #item

        impl #impl_generics ::rocketmesh::ListenerDefinition for #self_ty #where_clause {
            type Payload = #payload;

            fn listener_config() -> ::rocketmesh::ListenerConfigBuilder {
                ::rocketmesh::ListenerConfig::builder(#consumer_group, #topic)
                    #(#setters)*
            }
        }
    };

    TokenStream::from(expanded)
}
