#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod feature;
pub mod meta;
pub mod metrics;

/// Protobuf types and service definitions.
pub mod api {
    pub mod feature {
        pub mod v1 {
            include!("gen/feature.v1.rs");
        }
    }

    pub mod meta {
        pub mod v1 {
            include!("gen/meta.v1.rs");
        }
    }
}
