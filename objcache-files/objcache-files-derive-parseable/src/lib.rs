extern crate proc_macro2;

use proc_macro_crate::{FoundCrate, crate_name};
use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::{Data, DeriveInput, Fields, FieldsNamed, Ident, parse_macro_input, spanned::Spanned};

/// Reads every named field in declaration order through its own `Parseable` impl.
#[proc_macro_derive(Parse)]
pub fn derive_parseable(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    derive_parse_internal(input).into()
}

/// Writes every named field in declaration order through its own `Emittable` impl.
/// The mirror image of `#[derive(Parse)]`, so records round trip byte for byte.
#[proc_macro_derive(Emit)]
pub fn derive_emittable(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    derive_emit_internal(input).into()
}

fn files_crate() -> TokenStream {
    let found_crate = crate_name("objcache-files").expect("objcache-files is present in `Cargo.toml`");

    match found_crate {
        FoundCrate::Itself => quote!(crate),
        FoundCrate::Name(name) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(#ident)
        }
    }
}

fn named_fields<'a>(input: &'a DeriveInput, derive: &str) -> &'a FieldsNamed {
    let ident = &input.ident;
    match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(fields) => fields,
            _ => panic!(
                "#[derive({})]` only supports named struct fields at the moment: {}",
                derive, ident
            ),
        },
        _ => panic!("`#[derive({})]` is only available on structs: {}", derive, ident),
    }
}

// taken from sharnoff/derive-syn-parse: put it into a separate function for testability
pub(crate) fn derive_parse_internal(input: DeriveInput) -> TokenStream {
    let crate_name = files_crate();
    let fields = named_fields(&input, "Parse");

    // TODO: generic field types (Vec<T>) need the turbofish form, i.e. Vec::<T>::parse.
    let recurse = fields.named.iter().map(|f| {
        let name = &f.ident;
        let ftype = &f.ty;
        quote_spanned! {f.span()=>
            #name: <#ftype as #crate_name::common::reader::Parseable<#ftype>>::parse(rdr)?,
        }
    });

    let ident = &input.ident;
    quote!(
        impl #crate_name::common::reader::Parseable<#ident> for #ident {
            fn parse<R: std::io::Read>(rdr: &mut R) -> Result<#ident, #crate_name::ParserError> {
                Ok(#ident{
                    #(#recurse)*
                })
            }
        }
    )
}

pub(crate) fn derive_emit_internal(input: DeriveInput) -> TokenStream {
    let crate_name = files_crate();
    let fields = named_fields(&input, "Emit");

    let recurse = fields.named.iter().map(|f| {
        let name = &f.ident;
        quote_spanned! {f.span()=>
            #crate_name::common::writer::Emittable::emit(&self.#name, wtr)?;
        }
    });

    let ident = &input.ident;
    quote!(
        impl #crate_name::common::writer::Emittable for #ident {
            fn emit<W: std::io::Write>(&self, wtr: &mut W) -> Result<(), #crate_name::ParserError> {
                #(#recurse)*
                Ok(())
            }
        }
    )
}
