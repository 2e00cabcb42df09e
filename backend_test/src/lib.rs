use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, spanned::Spanned, FnArg, GenericArgument, Ident, ItemFn, Pat, PathArguments,
    Signature, Type, TypePath,
};

/// Transform an asynchronous test into a synchronous one, inject dependencies,
/// and ensure that the test database is dropped regardless of how the test
/// terminates.
///
/// Injectable parameters, in any order, are a [`rocket::local::asynchronous::Client`]
/// (spelled `Client`), a [`mongodb::Database`] (spelled `Database`), and any
/// number of `Coll<T>` collections.
///
/// `#[backend_test(admin)]` and `#[backend_test(voter)]` additionally insert
/// the example admin or voter profile before the test body runs.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);
    let role = parse_macro_input!(args as Option<Ident>);

    let injected = match injected_args(&item_fn.sig) {
        Ok(injected) => injected,
        Err(err) => return err.into_compile_error().into(),
    };
    let seed_profile = match role.map(seed_profile).transpose() {
        Ok(seed) => seed.unwrap_or_default(),
        Err(err) => return err.into_compile_error().into(),
    };

    // The async body keeps a suffixed name; the generated `#[test]` takes
    // over the original one.
    let name = item_fn.sig.ident.clone();
    let body_name = format_ident!("{}_body", name);
    item_fn.sig.ident = body_name.clone();

    let arg_exprs = injected.iter().map(Injected::expr);

    quote! {
        #[test]
        fn #name() {
            async fn setup() -> (rocket::local::asynchronous::Client, mongodb::Database) {
                log4rs_test_utils::test_logging::init_logging_once_for(["ballot_backend"], None, None);
                let db_client = crate::db_client().await;
                let db_name = crate::database();
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::rocket_for_db(db_client.clone(), &db_name).await,
                )
                .await
                .unwrap();
                let db = db_client.database(&db_name);
                #seed_profile
                (rocket_client, db)
            }

            #item_fn

            // Setup and cleanup run on their own runtime so that cleanup still
            // works after the test's runtime has been poisoned by a panic.
            let housekeeping = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-housekeeping")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let test_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            let (rocket_client, db) = housekeeping.block_on(setup());

            // Mutexes carry the `!UnwindSafe` values into `catch_unwind`.
            let client_cell = std::sync::Mutex::new(rocket_client);
            let db_cell = std::sync::Mutex::new(db.clone());
            let runtime_cell = std::sync::Mutex::new(test_runtime);
            let outcome = std::panic::catch_unwind(|| {
                let rocket_client = client_cell.into_inner().unwrap();
                let db = db_cell.into_inner().unwrap();
                let runtime = runtime_cell.into_inner().unwrap();
                runtime.block_on(#body_name(#(#arg_exprs),*));
            });

            housekeeping.block_on(async move { db.drop(None).await.unwrap() });

            if let Err(cause) = outcome {
                std::panic::resume_unwind(cause);
            }
        }
    }
    .into()
}

/// One parameter of the wrapped test.
enum Injected {
    Client,
    Database,
    Collection(Ident),
}

impl Injected {
    /// The expression passed for this parameter.
    fn expr(&self) -> TokenStream2 {
        match self {
            Self::Client => quote! { rocket_client },
            Self::Database => quote! { db.clone() },
            Self::Collection(ty) => {
                quote! { crate::model::mongodb::Coll::<#ty>::from_db(&db) }
            }
        }
    }
}

/// Statements that insert the example profile for `role`.
fn seed_profile(role: Ident) -> syn::Result<TokenStream2> {
    let profile = if role == "admin" {
        quote! { crate::model::db::voter::NewVoterProfile::example_admin() }
    } else if role == "voter" {
        quote! { crate::model::db::voter::NewVoterProfile::example() }
    } else {
        return Err(syn::Error::new(
            role.span(),
            "Expected `admin`, `voter`, or no argument",
        ));
    };
    Ok(quote! {
        crate::model::mongodb::Coll::<crate::model::db::voter::NewVoterProfile>::from_db(&db)
            .insert_one(#profile, None)
            .await
            .unwrap();
    })
}

/// Classify the test's parameters, rejecting non-async tests and anything
/// that cannot be injected.
fn injected_args(sig: &Signature) -> syn::Result<Vec<Injected>> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut injected = Vec::new();
    for input in &sig.inputs {
        let arg = match input {
            FnArg::Typed(pat_type) if matches!(*pat_type.pat, Pat::Ident(_)) => {
                match &*pat_type.ty {
                    Type::Path(type_path) => classify(type_path),
                    _ => None,
                }
            }
            _ => None,
        };
        let arg = arg.ok_or_else(|| {
            syn::Error::new(
                input.span(),
                "Expected one of `client: Client`, `db: Database` or `coll: Coll<T>`",
            )
        })?;

        let duplicate = injected.iter().any(|seen| {
            matches!(
                (seen, &arg),
                (Injected::Client, Injected::Client) | (Injected::Database, Injected::Database)
            )
        });
        if duplicate {
            return Err(syn::Error::new(
                input.span(),
                "Test cannot accept more than one `Client` or `Database`",
            ));
        }
        injected.push(arg);
    }
    Ok(injected)
}

fn classify(type_path: &TypePath) -> Option<Injected> {
    if let Some(ident) = type_path.path.get_ident() {
        return if ident == "Client" {
            Some(Injected::Client)
        } else if ident == "Database" {
            Some(Injected::Database)
        } else {
            None
        };
    }

    let last = type_path.path.segments.last()?;
    if last.ident != "Coll" {
        return None;
    }
    let PathArguments::AngleBracketed(generics) = &last.arguments else {
        return None;
    };
    match generics.args.first() {
        Some(GenericArgument::Type(Type::Path(inner))) => {
            inner.path.get_ident().cloned().map(Injected::Collection)
        }
        _ => None,
    }
}
