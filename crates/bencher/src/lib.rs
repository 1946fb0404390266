//! Wire payload fixtures shared by the benchmarks.

/// A raw wire payload captured as a core would send it.
#[derive(Debug, Copy, Clone)]
pub struct Fixture {
    name: &'static str,
    raw: &'static str,
}

impl Fixture {
    pub const fn new(name: &'static str, raw: &'static str) -> Self {
        Self { name, raw }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn raw(&self) -> &'static str {
        self.raw
    }

    pub fn len(&self) -> u64 {
        self.raw.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn size(&self) -> FixtureSize {
        match self.raw.len() {
            0..1024 => FixtureSize::Small,
            1024..16384 => FixtureSize::Normal,
            _ => FixtureSize::Large,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixtureSize {
    Small,
    Normal,
    Large,
}

pub static GET_SMALL: Fixture = Fixture::new("get_small", include_str!("../resources/payload/get_small.json"));
pub static POST_JSON_LARGE: Fixture =
    Fixture::new("post_json_large", include_str!("../resources/payload/post_json_large.json"));
pub static PUT_BINARY: Fixture = Fixture::new("put_binary", include_str!("../resources/payload/put_binary.json"));

pub fn fixtures() -> [Fixture; 3] {
    [GET_SMALL, POST_JSON_LARGE, PUT_BINARY]
}
