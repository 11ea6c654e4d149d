//! Typed identifiers of zoned Instance API resources.
//!
//! Each identifier knows the collection it belongs to, so request paths
//! are spelled in one place.

use std::ops::Deref;

/// Availability zone every request of a client is scoped to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Zone(String);

impl Zone {
    pub(crate) fn new(raw: &str) -> Self {
        Self(raw.trim().to_owned())
    }

    pub(crate) const fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Prefixes a resource path with `/zones/{zone}`.
    pub(crate) fn scope(&self, path: &str) -> String {
        format!("/zones/{}{path}", self.0)
    }
}

macro_rules! instance_resource {
    ($(#[$meta:meta])* $name:ident => $collection:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub(crate) const fn as_str(&self) -> &str {
                self.0.as_str()
            }

            /// Zone-relative path of the resource.
            pub(crate) fn path(&self) -> String {
                format!(concat!("/", $collection, "/{}"), self.0)
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }
    };
}

instance_resource!(
    /// Block volume backing a disk.
    VolumeId => "volumes"
);
instance_resource!(
    /// Snapshot taken from a volume.
    SnapshotId => "snapshots"
);
instance_resource!(
    /// Machine image built from a snapshot.
    ImageId => "images"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_is_trimmed_and_scopes_paths() {
        let zone = Zone::new(" nl-ams-1 ");
        assert_eq!(zone.as_str(), "nl-ams-1");
        assert_eq!(zone.scope("/volumes"), "/zones/nl-ams-1/volumes");
    }

    #[test]
    fn resources_live_in_their_collection() {
        assert_eq!(VolumeId::new("vol-1").path(), "/volumes/vol-1");
        assert_eq!(SnapshotId::new("snap-1").path(), "/snapshots/snap-1");
        assert_eq!(ImageId::new("img-1").path(), "/images/img-1");
    }
}
