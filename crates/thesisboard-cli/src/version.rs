pub const FULL: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+git.",
    env!("THESISBOARD_GIT_SHA"),
    env!("THESISBOARD_GIT_DIRTY")
);
