//! Git and git-annex backed result store.

pub mod git_annex_store;

pub use git_annex_store::GitAnnexStore;
