use std::fmt;

use proc_macro::TokenStream;
use quote::{format_ident, quote};

/// Where the generated items are visible.
enum TagVisibility {
    Public(proc_macro2::Span),
    Crate(proc_macro2::Span),
    Private,
}

impl TagVisibility {
    fn to_syn(&self) -> syn::Visibility {
        match *self {
            Self::Public(span) => syn::Visibility::Public(syn::token::Pub { span }),
            Self::Crate(span) => syn::parse_quote_spanned!(span=> pub(crate)),
            Self::Private => syn::Visibility::Inherited,
        }
    }
}

impl fmt::Display for TagVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Public(..) => "public",
            Self::Crate(..) => "crate",
            Self::Private => "private",
        })
    }
}

impl syn::parse::Parse for TagVisibility {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        // `crate` is a keyword, so it never parses as an `Ident`.
        if input.peek(syn::Token![crate]) {
            let token = input.parse::<syn::Token![crate]>()?;
            return Ok(Self::Crate(token.span));
        }

        let identifier = input.parse::<syn::Ident>()?;
        match identifier.to_string().as_str() {
            "public" => Ok(Self::Public(identifier.span())),
            "private" => Ok(Self::Private),
            _ => Err(syn::Error::new_spanned(
                identifier,
                "expected `public`, `crate` or `private`",
            )),
        }
    }
}

struct EnumTagsArgs {
    visibility: TagVisibility,
    repr_type: syn::Type,
}

impl syn::parse::Parse for EnumTagsArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        mod kw {
            syn::custom_keyword!(repr);
        }

        let visibility: TagVisibility = input.parse()?;

        input.parse::<syn::Token![,]>().map_err(|mut error| {
            error.combine(syn::Error::new(
                input.span(),
                format!("missing comma after `{}`", visibility),
            ));
            error
        })?;

        input.parse::<kw::repr>().map_err(|mut error| {
            error.combine(syn::Error::new(
                input.span(),
                format!("missing `repr(...)` after `{},`", visibility),
            ));
            error
        })?;

        let content;
        syn::parenthesized!(content in input);
        let repr_type = content.parse()?;

        Ok(Self {
            visibility,
            repr_type,
        })
    }
}

/// Reads an explicit `= N` discriminant, if any.
fn literal_discriminant(variant: &syn::Variant) -> syn::Result<Option<usize>> {
    let Some((_, expr)) = &variant.discriminant else {
        return Ok(None);
    };
    match expr {
        syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Int(int_literal),
            ..
        }) => int_literal.base10_parse::<usize>().map(Some),
        other => Err(syn::Error::new_spanned(
            other,
            "only integer literal discriminants are allowed",
        )),
    }
}

fn expand(
    args: EnumTagsArgs,
    enum_name: &syn::Ident,
    data_enum: &syn::DataEnum,
) -> syn::Result<proc_macro2::TokenStream> {
    let visibility = args.visibility.to_syn();
    let repr_type = args.repr_type;

    let mut tag_constants = Vec::new();
    let mut match_arms = Vec::new();
    let mut next_tag = 0usize;
    let mut tag_count = 0usize;

    for variant in &data_enum.variants {
        if let Some(explicit) = literal_discriminant(variant)? {
            next_tag = explicit;
        }
        let tag = next_tag;
        next_tag += 1;
        tag_count = tag_count.max(next_tag);

        let variant_name = &variant.ident;
        let constant_name = format_ident!(
            "{}_TAG",
            variant_name.to_string().to_ascii_uppercase()
        );
        tag_constants.push(quote! {
            #[doc = concat!("`#[enum_tags]`-generated tag for `Self::", stringify!(#variant_name), "`.")]
            #visibility const #constant_name: #repr_type = #tag as _;
        });

        let pattern = match variant.fields {
            syn::Fields::Named(_) => quote! { Self::#variant_name { .. } },
            syn::Fields::Unnamed(_) => quote! { Self::#variant_name(..) },
            syn::Fields::Unit => quote! { Self::#variant_name },
        };
        match_arms.push(quote! { #pattern => Self::#constant_name });
    }

    Ok(quote! {
        impl #enum_name {
            #(#tag_constants)*

            #[doc = "`#[enum_tags]`-generated count: one past the largest tag."]
            #visibility const TAG_COUNT: usize = #tag_count;

            #[doc = "`#[enum_tags]`-generated getter for this variant's tag."]
            #visibility const fn tag(&self) -> #repr_type {
                match self {
                    #(#match_arms),*
                }
            }
        }
    })
}

/// Generates tag constants, a `TAG_COUNT` and a `const fn tag(&self)` for
/// an `enum`, whether or not its variants carry fields.
///
/// Usage examples:
///
/// * `#[enum_tags(public, repr(u8))]`
/// * `#[enum_tags(crate, repr(u32))]`
///
/// Tags start at zero and count up in declaration order; an integer literal
/// discriminant restarts the count from its value. The `repr` type only
/// needs to accept a `usize` through `as`; it is unrelated to any
/// `#[repr(...)]` on the enum itself.
#[proc_macro_attribute]
pub fn enum_tags(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = syn::parse_macro_input!(args as EnumTagsArgs);
    let item = syn::parse_macro_input!(input as syn::DeriveInput);

    let data_enum = match &item.data {
        syn::Data::Enum(data_enum) => data_enum,
        syn::Data::Struct(syn::DataStruct {
            struct_token: syn::token::Struct { span },
            ..
        })
        | syn::Data::Union(syn::DataUnion {
            union_token: syn::token::Union { span },
            ..
        }) => {
            return syn::Error::new(*span, "`#[enum_tags]` needs an `enum`")
                .into_compile_error()
                .into();
        }
    };

    let tags_impl = match expand(args, &item.ident, data_enum) {
        Ok(tokens) => tokens,
        Err(error) => error.into_compile_error(),
    };

    quote! {
        #item

        #tags_impl
    }
    .into()
}
