use std::{
    collections::{HashMap, HashSet},
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

/// The filesystem operations a list needs in order to spill and reload
/// records. Paths are passed through untouched; it is up to the
/// implementation to interpret them.
pub trait SpillDir: Clone + std::fmt::Debug + Send + Sync + 'static {
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsDir;

impl SpillDir for OsDir {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(path)?;
        file.write_all(data)?;
        file.flush()
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

// Mock Implementation
#[derive(Clone, Debug, Default)]
pub struct MockDir {
    pub fs: Arc<Mutex<MockFs>>,
}

impl MockDir {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpillDir for MockDir {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.fs.lock().create_dir_all(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.fs.lock().write(path, data)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.fs.lock().read(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateDir(PathBuf),
    Write(PathBuf, Vec<u8>),
    Read(PathBuf),
}

impl Event {
    pub fn write_abbrev<W: std::fmt::Write>(&self, w: &mut W) -> std::fmt::Result {
        match self {
            Event::CreateDir(path) => write!(w, "CreateDir({})", path.display()),
            Event::Write(path, contents) => write!(
                w,
                "Write({}, {})",
                path.display(),
                String::from_utf8_lossy(contents)
            ),
            Event::Read(path) => write!(w, "Read({})", path.display()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockFs {
    dirs: HashSet<PathBuf>,
    files: HashMap<PathBuf, Vec<u8>>,
    events: Vec<Event>,

    // After this many operations, "crash" the FS, meaning every further
    // operation fails until `reboot`.
    time_to_crash: Option<usize>,
}

impl MockFs {
    fn check_crashed(&self) -> io::Result<()> {
        if self.time_to_crash == Some(0) {
            Err(io::Error::new(io::ErrorKind::Other, "filesystem is down"))
        } else {
            Ok(())
        }
    }

    pub fn schedule_crash(&mut self, ops: usize) {
        self.time_to_crash = Some(ops);
    }

    pub fn reboot(&mut self) {
        self.time_to_crash = None;
    }

    fn perform_op(&mut self) -> io::Result<()> {
        self.check_crashed()?;
        if let Some(x) = self.time_to_crash {
            self.time_to_crash = Some(x - 1);
        }
        Ok(())
    }

    fn record(&mut self, e: Event) {
        self.events.push(e);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Drops a file without going through the list, as an operator deleting
    /// it by hand would.
    pub fn remove(&mut self, path: &Path) -> bool {
        self.files.remove(path).is_some()
    }

    /// Replaces the contents of an existing file behind the list's back.
    pub fn overwrite(&mut self, path: &Path, data: &[u8]) -> bool {
        match self.files.get_mut(path) {
            Some(contents) => {
                contents.clear();
                contents.extend_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn create_dir_all(&mut self, path: &Path) -> io::Result<()> {
        self.perform_op()?;
        self.record(Event::CreateDir(path.to_owned()));
        for ancestor in path.ancestors() {
            if !ancestor.as_os_str().is_empty() {
                self.dirs.insert(ancestor.to_owned());
            }
        }
        Ok(())
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.perform_op()?;

        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !self.dirs.contains(parent) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("directory {} does not exist", parent.display()),
                ));
            }
            _ => {}
        }

        self.record(Event::Write(path.to_owned(), data.to_vec()));
        self.files.insert(path.to_owned(), data.to_vec());
        Ok(())
    }

    fn read(&mut self, path: &Path) -> io::Result<Vec<u8>> {
        self.perform_op()?;
        self.record(Event::Read(path.to_owned()));
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file {} does not exist", path.display()),
            )
        })
    }
}

#[test]
fn test_mock_dir() -> anyhow::Result<()> {
    let dir = MockDir::new();
    let path = Path::new("spill/a");

    let err = dir.write_file(path, &[1, 2, 3]).unwrap_err();
    assert_eq!(io::ErrorKind::NotFound, err.kind());

    dir.create_dir_all(Path::new("spill"))?;
    dir.write_file(path, &[1, 2, 3, 4])?;
    assert_eq!(vec![1, 2, 3, 4], dir.read_file(path)?);

    assert!(dir.fs.lock().remove(path));
    let err = dir.read_file(path).unwrap_err();
    assert_eq!(io::ErrorKind::NotFound, err.kind());

    assert_eq!(
        vec![
            Event::CreateDir("spill".into()),
            Event::Write(path.to_owned(), vec![1, 2, 3, 4]),
            Event::Read(path.to_owned()),
            Event::Read(path.to_owned()),
        ],
        dir.fs.lock().take_events()
    );

    Ok(())
}

#[test]
fn test_mock_crash() -> anyhow::Result<()> {
    let dir = MockDir::new();
    dir.fs.lock().schedule_crash(1);

    dir.create_dir_all(Path::new("spill"))?;
    assert!(dir.write_file(Path::new("spill/a"), b"x").is_err());
    assert!(dir.read_file(Path::new("spill/a")).is_err());

    dir.fs.lock().reboot();
    dir.write_file(Path::new("spill/a"), b"x")?;
    assert_eq!(b"x".to_vec(), dir.read_file(Path::new("spill/a"))?);

    Ok(())
}

#[test]
fn test_os_dir() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = OsDir;
    let nested = tmp.path().join("a").join("b");

    dir.create_dir_all(&nested)?;
    let path = nested.join("0.json");
    dir.write_file(&path, b"first")?;
    dir.write_file(&path, b"2nd")?;
    assert_eq!(b"2nd".to_vec(), dir.read_file(&path)?);

    let err = dir.read_file(&nested.join("1.json")).unwrap_err();
    assert_eq!(io::ErrorKind::NotFound, err.kind());

    Ok(())
}
