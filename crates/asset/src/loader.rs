//! Asynchronous resource loader with a keyed cache.
//!
//! `load` starts every fetch of a manifest at once and keeps a single join
//! future. The owner advances it with [`Loader::poll`] once per frame (never
//! blocking) or waits with [`Loader::finish`]. Results land in the cache only
//! when every fetch of the batch succeeded.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    task::{Context, Poll},
};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{self, LocalBoxFuture},
};

use crate::{
    error::{AssetError, AssetResult},
    manifest::{Manifest, ResourceKind, ResourceSpec},
    texture::TextureData,
};

/// A decoded payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Text(String),
    Image(TextureData),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Text(_) => ResourceKind::Text,
            Resource::Image(_) => ResourceKind::Image,
        }
    }

    fn decode(key: &str, spec: &ResourceSpec, bytes: Vec<u8>) -> AssetResult<Self> {
        let load_error = |reason: String| AssetError::ResourceLoad {
            key: key.to_owned(),
            url: spec.url.clone(),
            reason,
        };
        match spec.kind {
            ResourceKind::Text => String::from_utf8(bytes)
                .map(Resource::Text)
                .map_err(|e| load_error(format!("not valid UTF-8: {e}"))),
            ResourceKind::Image => TextureData::from_encoded(&bytes)
                .map(Resource::Image)
                .map_err(|e| load_error(e.to_string())),
        }
    }
}

/// Loaded resources by key.
#[derive(Debug, Default)]
pub struct Resources {
    map: HashMap<String, Resource>,
}

impl Resources {
    pub fn get(&self, key: &str) -> AssetResult<&Resource> {
        self.map
            .get(key)
            .ok_or_else(|| AssetError::MissingResource(key.to_owned()))
    }

    pub fn text(&self, key: &str) -> AssetResult<&str> {
        match self.get(key)? {
            Resource::Text(text) => Ok(text),
            other => Err(kind_mismatch(key, ResourceKind::Text, other)),
        }
    }

    pub fn image(&self, key: &str) -> AssetResult<&TextureData> {
        match self.get(key)? {
            Resource::Image(image) => Ok(image),
            other => Err(kind_mismatch(key, ResourceKind::Image, other)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn extend(&mut self, loaded: Vec<(String, Resource)>) {
        self.map.extend(loaded);
    }
}

fn kind_mismatch(key: &str, expected: ResourceKind, found: &Resource) -> AssetError {
    AssetError::KindMismatch {
        key: key.to_owned(),
        expected,
        found: found.kind(),
    }
}

/// Source of raw resource bytes.
///
/// Calling `fetch` starts the transfer; the returned future only waits for it.
/// Dropping the future abandons the result.
pub trait Fetch {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, io::Result<Vec<u8>>>;
}

/// Reads urls as paths below a root directory, one worker thread per file.
#[derive(Clone, Debug)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Fetch for FileFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, io::Result<Vec<u8>>> {
        let path = self.root.join(url);
        let (tx, rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name(format!("fetch {url}"))
            .spawn(move || {
                log::debug!("Reading {:?}", path);
                // The receiver is gone if the load was cancelled.
                let _ = tx.send(std::fs::read(&path));
            });
        if let Err(e) = spawned {
            return future::ready(Err(e)).boxed_local();
        }
        rx.map(|result| {
            result.unwrap_or_else(|_| Err(io::Error::other("fetch worker exited without a result")))
        })
        .boxed_local()
    }
}

/// In-memory sources, for embedded assets.
#[derive(Clone, Debug, Default)]
pub struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url.into(), bytes.into());
        self
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, io::Result<Vec<u8>>> {
        let result = self.files.get(url).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no embedded file '{url}'"))
        });
        future::ready(result).boxed_local()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    /// Fetches are still in flight.
    Pending,
    /// Nothing in flight; every requested resource is in the cache.
    Ready,
}

type Batch = LocalBoxFuture<'static, AssetResult<Vec<(String, Resource)>>>;

pub struct Loader {
    fetcher: Box<dyn Fetch>,
    resources: Resources,
    pending: Option<Batch>,
}

impl Loader {
    pub fn new(fetcher: impl Fetch + 'static) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            resources: Resources::default(),
            pending: None,
        }
    }

    /// Start fetching every entry of `manifest`. Batches requested while
    /// another one is in flight are joined with it.
    pub fn load(&mut self, manifest: &Manifest) {
        log::info!("Loading {} resource(s)", manifest.len());
        let fetches: Vec<_> = manifest
            .iter()
            .map(|(key, spec)| {
                let key = key.to_owned();
                let spec = spec.clone();
                let bytes = self.fetcher.fetch(&spec.url);
                async move {
                    let bytes = bytes.await.map_err(|e| AssetError::ResourceLoad {
                        key: key.clone(),
                        url: spec.url.clone(),
                        reason: e.to_string(),
                    })?;
                    let resource = Resource::decode(&key, &spec, bytes)?;
                    log::debug!("Loaded '{}' ({:?})", key, spec.kind);
                    Ok::<_, AssetError>((key, resource))
                }
            })
            .collect();

        let batch: Batch = future::try_join_all(fetches).boxed_local();
        self.pending = Some(match self.pending.take() {
            Some(previous) => future::try_join(previous, batch)
                .map(|joined| {
                    joined.map(|(mut a, b)| {
                        a.extend(b);
                        a
                    })
                })
                .boxed_local(),
            None => batch,
        });
    }

    /// Advance outstanding fetches without blocking.
    ///
    /// The first failing resource fails the whole batch; nothing of it is
    /// cached.
    pub fn poll(&mut self) -> AssetResult<LoadStatus> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(LoadStatus::Ready);
        };
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match pending.as_mut().poll(&mut cx) {
            Poll::Pending => Ok(LoadStatus::Pending),
            Poll::Ready(result) => {
                self.pending = None;
                self.complete(result)
            }
        }
    }

    /// Block until outstanding fetches are done.
    pub fn finish(&mut self) -> AssetResult<()> {
        if let Some(pending) = self.pending.take() {
            self.complete(pollster::block_on(pending))?;
        }
        Ok(())
    }

    fn complete(&mut self, result: AssetResult<Vec<(String, Resource)>>) -> AssetResult<LoadStatus> {
        match result {
            Ok(loaded) => {
                log::info!("Loaded {} resource(s)", loaded.len());
                self.resources.extend(loaded);
                Ok(LoadStatus::Ready)
            }
            Err(e) => {
                log::error!("Resource loading failed: {e}");
                Err(e)
            }
        }
    }

    /// Abandon in-flight fetches. Their results are discarded when they
    /// arrive.
    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            log::info!("Cancelled outstanding resource fetches");
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Drop every cached resource.
    pub fn clear(&mut self) {
        self.cancel();
        self.resources = Resources::default();
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("resources", &self.resources.len())
            .field("loading", &self.is_loading())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    const PPM: &[u8] = b"P3\n1 1\n255\n10 20 30\n";

    /// Fetches complete only when the test releases them.
    #[derive(Clone, Default)]
    struct GatedFetcher {
        gates: Rc<RefCell<Vec<(String, oneshot::Sender<io::Result<Vec<u8>>>)>>>,
    }

    impl GatedFetcher {
        fn release(&self, url: &str, bytes: &[u8]) {
            let mut gates = self.gates.borrow_mut();
            let pos = gates.iter().position(|(u, _)| u == url).expect("gate exists");
            let (_, tx) = gates.remove(pos);
            let _ = tx.send(Ok(bytes.to_vec()));
        }
    }

    impl Fetch for GatedFetcher {
        fn fetch(&self, url: &str) -> LocalBoxFuture<'static, io::Result<Vec<u8>>> {
            let (tx, rx) = oneshot::channel();
            self.gates.borrow_mut().push((url.to_owned(), tx));
            rx.map(|r| r.unwrap_or_else(|_| Err(io::Error::other("dropped"))))
                .boxed_local()
        }
    }

    fn manifest() -> Manifest {
        Manifest::new()
            .text("texture.vert", "texture.vert")
            .image("tank-texture", "tank.ppm")
    }

    #[test]
    fn payload_kind_follows_manifest() {
        let fetcher = MemoryFetcher::new()
            .with_file("texture.vert", "@vertex fn vs_main() {}")
            .with_file("tank.ppm", PPM);
        let mut loader = Loader::new(fetcher);
        loader.load(&manifest());
        loader.finish().expect("load succeeds");

        let resources = loader.resources();
        assert_eq!(resources.text("texture.vert").unwrap(), "@vertex fn vs_main() {}");
        let image = resources.image("tank-texture").expect("image");
        assert_eq!(image.data, vec![10, 20, 30, 255]);
        assert_eq!(resources.get("tank-texture").unwrap().kind(), ResourceKind::Image);
        assert!(matches!(
            resources.text("tank-texture"),
            Err(AssetError::KindMismatch { expected: ResourceKind::Text, .. })
        ));
    }

    #[test]
    fn lookup_before_completion_is_missing() {
        let fetcher = GatedFetcher::default();
        let mut loader = Loader::new(fetcher.clone());
        loader.load(&manifest());

        assert_eq!(loader.poll().unwrap(), LoadStatus::Pending);
        assert!(matches!(
            loader.resources().text("texture.vert"),
            Err(AssetError::MissingResource(key)) if key == "texture.vert"
        ));

        // One of two done is still not done.
        fetcher.release("texture.vert", b"src");
        assert_eq!(loader.poll().unwrap(), LoadStatus::Pending);
        assert!(loader.resources().is_empty());

        fetcher.release("tank.ppm", PPM);
        assert_eq!(loader.poll().unwrap(), LoadStatus::Ready);
        assert_eq!(loader.resources().len(), 2);
        assert!(!loader.is_loading());
    }

    #[test]
    fn unknown_key_is_missing() {
        let mut loader = Loader::new(MemoryFetcher::new());
        loader.finish().unwrap();
        assert!(matches!(
            loader.resources().get("nope"),
            Err(AssetError::MissingResource(_))
        ));
    }

    #[test]
    fn one_failed_fetch_fails_the_batch() {
        let fetcher = MemoryFetcher::new().with_file("texture.vert", "src");
        let mut loader = Loader::new(fetcher);
        loader.load(&manifest());
        let err = loader.finish().unwrap_err();
        assert!(matches!(err, AssetError::ResourceLoad { ref key, .. } if key == "tank-texture"));
        assert!(loader.resources().is_empty());
    }

    #[test]
    fn undecodable_payloads_fail() {
        let fetcher = MemoryFetcher::new()
            .with_file("texture.vert", vec![0xffu8, 0xfe])
            .with_file("tank.ppm", PPM);
        let mut loader = Loader::new(fetcher);
        loader.load(&manifest());
        assert!(matches!(loader.finish(), Err(AssetError::ResourceLoad { .. })));
    }

    #[test]
    fn cancel_abandons_outstanding_fetches() {
        let fetcher = GatedFetcher::default();
        let mut loader = Loader::new(fetcher.clone());
        loader.load(&manifest());
        loader.cancel();
        assert!(!loader.is_loading());

        // Late results go nowhere.
        fetcher.release("texture.vert", b"src");
        fetcher.release("tank.ppm", PPM);
        assert_eq!(loader.poll().unwrap(), LoadStatus::Ready);
        assert!(loader.resources().is_empty());
    }

    #[test]
    fn second_batch_joins_the_first() {
        let fetcher = GatedFetcher::default();
        let mut loader = Loader::new(fetcher.clone());
        loader.load(&Manifest::new().text("a", "a"));
        loader.load(&Manifest::new().text("b", "b"));
        fetcher.release("b", b"B");
        assert_eq!(loader.poll().unwrap(), LoadStatus::Pending);
        fetcher.release("a", b"A");
        assert_eq!(loader.poll().unwrap(), LoadStatus::Ready);
        assert_eq!(loader.resources().text("a").unwrap(), "A");
        assert_eq!(loader.resources().text("b").unwrap(), "B");
    }

    #[test]
    fn file_fetcher_reads_below_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("shaders")).unwrap();
        std::fs::write(dir.path().join("shaders/simple.frag"), "frag source").unwrap();
        std::fs::write(dir.path().join("tex.ppm"), PPM).unwrap();

        let mut loader = Loader::new(FileFetcher::new(dir.path()));
        loader.load(
            &Manifest::new()
                .text("simple.frag", "shaders/simple.frag")
                .image("tex", "tex.ppm"),
        );
        loader.finish().expect("files load");
        assert_eq!(loader.resources().text("simple.frag").unwrap(), "frag source");
        assert_eq!(loader.resources().image("tex").unwrap().width, 1);

        loader.load(&Manifest::new().text("gone", "missing.txt"));
        assert!(matches!(loader.finish(), Err(AssetError::ResourceLoad { .. })));
    }
}
