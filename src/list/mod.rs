use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::Config,
    encoding::{Codec, JsonCodec},
    error::{ListError, Result},
    fs::{OsDir, SpillDir},
    sort::stable_sort_by,
};

pub use self::iter::{FailureSink, Iter, TracingSink};

mod iter;

// Everything a lookup needs to see consistently lives behind one lock.
#[derive(Debug)]
struct State<T> {
    hot: Vec<T>,
    total: usize,
    // Logical index -> physical position.
    order: Vec<usize>,
    sorted: bool,
}

struct Shared<T, D, C> {
    config: Config,
    dir: D,
    codec: C,
    sink: Arc<dyn FailureSink>,
    state: RwLock<State<T>>,
}

/// An append-only list that keeps its first `capacity` items in memory and
/// writes every later item to its own file under `base_path`.
///
/// Items are addressed by logical index. Until the list is sorted the logical
/// index is the insertion order; sorting only rearranges the mapping from
/// logical index to physical position, so spilled files are written exactly
/// once and never moved.
///
/// `SpillList` is a handle: clones share the same underlying list, and all
/// operations take `&self`.
pub struct SpillList<T, D = OsDir, C = JsonCodec> {
    shared: Arc<Shared<T, D, C>>,
}

impl<T, D, C> Clone for SpillList<T, D, C> {
    fn clone(&self) -> Self {
        SpillList {
            shared: self.shared.clone(),
        }
    }
}

impl<T, D, C> std::fmt::Debug for SpillList<T, D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("SpillList")
            .field("config", &self.shared.config)
            .field("len", &state.total)
            .field("hot", &state.hot.len())
            .field("sorted", &state.sorted)
            .finish()
    }
}

impl<T> SpillList<T>
where
    T: Serialize + DeserializeOwned,
{
    /// A list spilling JSON records to the real filesystem.
    pub fn new<P>(base_path: P, capacity: usize) -> Self
    where
        P: Into<PathBuf>,
    {
        Self::with_config(Config::new(base_path, capacity))
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_parts(config, OsDir, JsonCodec, Arc::new(TracingSink))
    }
}

impl<T, D, C> SpillList<T, D, C>
where
    D: SpillDir,
    C: Codec<T>,
{
    pub fn with_parts(config: Config, dir: D, codec: C, sink: Arc<dyn FailureSink>) -> Self {
        SpillList {
            shared: Arc::new(Shared {
                config,
                dir,
                codec,
                sink,
                state: RwLock::new(State {
                    hot: Vec::new(),
                    total: 0,
                    order: Vec::new(),
                    sorted: true,
                }),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.state.read().total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items held in memory.
    pub fn hot_len(&self) -> usize {
        self.shared.state.read().hot.len()
    }

    /// Number of items written to disk.
    pub fn spilled_len(&self) -> usize {
        let state = self.shared.state.read();
        state.total - state.hot.len()
    }

    pub fn is_sorted(&self) -> bool {
        self.shared.state.read().sorted
    }

    /// The file backing physical position `position`, or `None` if that
    /// position belongs to the in-memory tier. Says nothing about whether the
    /// file exists yet.
    pub fn spill_path(&self, position: usize) -> Option<PathBuf> {
        if position < self.capacity() {
            None
        } else {
            Some(self.record_path(position))
        }
    }

    fn record_path(&self, position: usize) -> PathBuf {
        self.shared
            .config
            .base_path
            .join(format!("{}.{}", position, self.shared.codec.extension()))
    }

    // Resolves the path for a new record, making sure its directory exists.
    fn create_record_path(&self, position: usize) -> Result<PathBuf> {
        let path = self.record_path(position);
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        self.shared
            .dir
            .create_dir_all(dir)
            .map_err(|e| ListError::io(dir, e))?;
        Ok(path)
    }

    /// Appends `item`. Once the in-memory tier is full the item is encoded and
    /// written to disk instead; if that fails the list is left exactly as it
    /// was.
    pub fn add(&self, item: T) -> Result<()> {
        let mut state = self.shared.state.write();
        let position = state.total;

        if state.hot.len() < self.shared.config.capacity {
            state.hot.push(item);
        } else {
            self.spill(position, &item)?;
        }

        state.order.push(position);
        state.total += 1;
        state.sorted = false;

        Ok(())
    }

    /// Adds each item in turn, stopping at the first failure. Items added
    /// before the failure stay in the list.
    pub fn add_all<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        for item in items {
            self.add(item)?;
        }
        Ok(())
    }

    fn spill(&self, position: usize, item: &T) -> Result<()> {
        let path = self.create_record_path(position)?;
        let data = self
            .shared
            .codec
            .encode(item)
            .map_err(|e| ListError::encode(position, e))?;
        self.shared
            .dir
            .write_file(&path, &data)
            .map_err(|e| ListError::io(&path, e))?;
        tracing::debug!(position, path = %path.display(), bytes = data.len(), "spilled list entry");
        Ok(())
    }

    /// Returns the item at logical index `index`.
    pub fn get(&self, index: usize) -> Result<T>
    where
        T: Clone,
    {
        let state = self.shared.state.read();
        let position = *state
            .order
            .get(index)
            .ok_or(ListError::IndexOutOfRange {
                index,
                len: state.total,
            })?;
        Ok(self.load(&state, position)?.into_owned())
    }

    // Hot items are borrowed straight out of the buffer; cold ones are read
    // and decoded.
    fn load<'a>(&self, state: &'a State<T>, position: usize) -> Result<Cow<'a, T>>
    where
        T: Clone,
    {
        match state.hot.get(position) {
            Some(item) => Ok(Cow::Borrowed(item)),
            None => self.read_record(position).map(Cow::Owned),
        }
    }

    fn read_record(&self, position: usize) -> Result<T> {
        let path = self.record_path(position);
        tracing::trace!(position, path = %path.display(), "reading spilled list entry");
        let data = self
            .shared
            .dir
            .read_file(&path)
            .map_err(|e| ListError::io(&path, e))?;
        self.shared
            .codec
            .decode(&data)
            .map_err(|e| ListError::decode(position, e))
    }

    /// Stably sorts the list so that `a` comes before `b` whenever
    /// `less(a, b)`.
    ///
    /// Does nothing if nothing has been added since the last sort, even if
    /// `less` differs from the comparator used then. Only the logical order
    /// changes; nothing on disk is rewritten, but comparisons read spilled
    /// items back, so a sort can fail on a missing or corrupt record. In that
    /// case the error is returned and the order is left as it was.
    ///
    /// If `less` is not a strict weak ordering the resulting order is some
    /// permutation of the items, with no further guarantee.
    pub fn sort_by<F>(&self, mut less: F) -> Result<()>
    where
        T: Clone,
        F: FnMut(&T, &T) -> bool,
    {
        let mut state = self.shared.state.write();
        if state.sorted {
            return Ok(());
        }

        let mut order = state.order.clone();
        let mut comparisons = 0_usize;
        {
            let state: &State<T> = &state;
            stable_sort_by(&mut order, |a: &usize, b: &usize| -> Result<bool> {
                comparisons += 1;
                let a = self.load(state, *a)?;
                let b = self.load(state, *b)?;
                Ok(less(&*a, &*b))
            })?;
        }

        state.order = order;
        state.sorted = true;
        tracing::debug!(len = state.total, comparisons, "sorted list");

        Ok(())
    }

    pub fn sort_by_key<K, F>(&self, mut f: F) -> Result<()>
    where
        T: Clone,
        K: Ord,
        F: FnMut(&T) -> K,
    {
        self.sort_by(|a, b| f(a) < f(b))
    }
}

#[cfg(test)]
mod test {
    use std::{collections::HashSet, fs, sync::Arc, thread};

    use rand::Rng;
    use serde::{Deserialize, Serialize};

    use crate::{
        config::Config,
        encoding::{FnCodec, JsonCodec},
        error::ListError,
        fs::{Event, MockDir},
    };

    use super::{SpillList, TracingSink};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Item {
        id: u32,
        label: String,
    }

    fn item(id: u32) -> Item {
        Item {
            id,
            label: format!("item-{}", id),
        }
    }

    fn mock_list(capacity: usize) -> (MockDir, SpillList<Item, MockDir>) {
        let dir = MockDir::new();
        let list = SpillList::with_parts(
            Config::new("spill", capacity),
            dir.clone(),
            JsonCodec,
            Arc::new(TracingSink),
        );
        (dir, list)
    }

    #[test]
    fn test_tiers() -> anyhow::Result<()> {
        for capacity in [0, 1, 4, 10] {
            for n in [0, 1, 4, 9] {
                let tmp = tempfile::tempdir()?;
                let list = SpillList::new(tmp.path(), capacity);
                list.add_all((0..n).map(item))?;

                assert_eq!(n as usize, list.len());
                assert_eq!(std::cmp::min(n as usize, capacity), list.hot_len());
                assert_eq!((n as usize).saturating_sub(capacity), list.spilled_len());

                let files = match fs::read_dir(tmp.path()) {
                    Ok(entries) => entries.count(),
                    Err(_) => 0,
                };
                assert_eq!(list.spilled_len(), files);
            }
        }
        Ok(())
    }

    #[test]
    fn test_spill_scenario() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let list = SpillList::new(tmp.path(), 2);
        list.add_all([item(1), item(2), item(3)])?;

        assert_eq!(2, list.hot_len());
        assert_eq!(None, list.spill_path(1));
        let path = list.spill_path(2).unwrap();
        assert_eq!(tmp.path().join("2.json"), path);

        let on_disk: Item = serde_json::from_slice(&fs::read(&path)?)?;
        assert_eq!(item(3), on_disk);
        assert_eq!(item(3), list.get(2)?);
        assert_eq!(item(1), list.get(0)?);

        match list.get(3) {
            Err(ListError::IndexOutOfRange { index: 3, len: 3 }) => {}
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_nested_base_path() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let base = tmp.path().join("a").join("b");
        let list = SpillList::new(&base, 0);
        list.add(item(5))?;
        assert!(base.join("0.json").exists());
        assert_eq!(item(5), list.get(0)?);
        Ok(())
    }

    #[test]
    fn test_sort_without_moving_files() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let list = SpillList::new(tmp.path(), 1);
        list.add_all([item(3), item(1), item(2)])?;

        let before: Vec<_> = (1..3)
            .map(|p| fs::read(list.spill_path(p).unwrap()))
            .collect::<Result<_, _>>()?;

        list.sort_by_key(|i| i.id)?;
        assert!(list.is_sorted());
        assert_eq!(1, list.get(0)?.id);
        assert_eq!(2, list.get(1)?.id);
        assert_eq!(3, list.get(2)?.id);

        let after: Vec<_> = (1..3)
            .map(|p| fs::read(list.spill_path(p).unwrap()))
            .collect::<Result<_, _>>()?;
        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn test_sort_is_stable() -> anyhow::Result<()> {
        let (_dir, list) = mock_list(3);
        let ids = [2, 1, 2, 0, 1, 2, 0, 1];
        for (i, id) in ids.iter().enumerate() {
            list.add(Item {
                id: *id,
                label: format!("{}", i),
            })?;
        }
        list.sort_by(|a, b| a.id < b.id)?;

        let got: Vec<(u32, String)> = (0..list.len())
            .map(|i| list.get(i).map(|it| (it.id, it.label)))
            .collect::<Result<_, _>>()?;
        let mut expected: Vec<(u32, String)> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, format!("{}", i)))
            .collect();
        expected.sort_by_key(|(id, _)| *id);
        assert_eq!(expected, got);
        Ok(())
    }

    #[test]
    fn test_sort_is_idempotent() -> anyhow::Result<()> {
        let (dir, list) = mock_list(1);
        list.add_all([item(4), item(2), item(9), item(1)])?;
        list.sort_by_key(|i| i.id)?;
        dir.fs.lock().take_events();

        // A second sort is a no-op, even with a different comparator.
        list.sort_by(|a, b| a.id > b.id)?;
        assert!(dir.fs.lock().take_events().is_empty());
        assert_eq!(1, list.get(0)?.id);

        // Adding invalidates the order.
        list.add(item(0))?;
        assert!(!list.is_sorted());
        assert_eq!(0, list.get(4)?.id);
        list.sort_by(|a, b| a.id > b.id)?;
        assert_eq!(9, list.get(0)?.id);
        assert_eq!(0, list.get(4)?.id);
        Ok(())
    }

    #[test]
    fn test_failed_spill_leaves_list_untouched() -> anyhow::Result<()> {
        let (dir, list) = mock_list(1);
        list.add(item(1))?;

        dir.fs.lock().schedule_crash(0);
        let err = list.add(item(2)).unwrap_err();
        assert!(matches!(err, ListError::Io { .. }), "{:?}", err);
        assert_eq!(1, list.len());
        assert_eq!(0, list.spilled_len());

        // The directory gets created, then the write itself fails.
        dir.fs.lock().reboot();
        dir.fs.lock().schedule_crash(1);
        assert!(list.add(item(2)).is_err());
        assert_eq!(1, list.len());
        assert_eq!(0, dir.fs.lock().file_count());

        dir.fs.lock().reboot();
        list.add(item(2))?;
        assert_eq!(2, list.len());
        assert_eq!(item(2), list.get(1)?);
        Ok(())
    }

    #[test]
    fn test_add_all_stops_at_first_failure() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let codec = FnCodec::new(
            "json",
            |i: &Item| {
                if i.id == 13 {
                    anyhow::bail!("unlucky");
                }
                Ok(serde_json::to_vec(i)?)
            },
            |b: &[u8]| Ok(serde_json::from_slice(b)?),
        );
        let list = SpillList::with_parts(
            Config::new("spill", 2),
            dir.clone(),
            codec,
            Arc::new(TracingSink),
        );

        let err = list.add_all((10..20).map(item)).unwrap_err();
        match err {
            ListError::Encode { position: 3, .. } => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(3, list.len());
        assert_eq!(item(12), list.get(2)?);
        assert_eq!(1, dir.fs.lock().file_count());
        Ok(())
    }

    #[test]
    fn test_get_missing_and_corrupt() -> anyhow::Result<()> {
        let (dir, list) = mock_list(1);
        list.add_all([item(1), item(2), item(3)])?;

        let p1 = list.spill_path(1).unwrap();
        let p2 = list.spill_path(2).unwrap();
        assert!(dir.fs.lock().remove(&p1));
        assert!(dir.fs.lock().overwrite(&p2, b"{\"id\":"));

        let err = list.get(1).unwrap_err();
        assert!(err.is_not_found(), "{:?}", err);
        match list.get(2) {
            Err(ListError::Decode { position: 2, .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(item(1), list.get(0)?);
        Ok(())
    }

    #[test]
    fn test_failed_sort_keeps_order() -> anyhow::Result<()> {
        let (dir, list) = mock_list(2);
        list.add_all([item(5), item(4), item(3), item(2)])?;
        assert!(dir.fs.lock().remove(&list.spill_path(3).unwrap()));

        assert!(list.sort_by_key(|i| i.id).is_err());
        assert!(!list.is_sorted());
        assert_eq!(5, list.get(0)?.id);
        assert_eq!(4, list.get(1)?.id);
        assert_eq!(3, list.get(2)?.id);
        Ok(())
    }

    #[test]
    fn test_concurrent_adds() -> anyhow::Result<()> {
        for capacity in [0, 10, 100] {
            let tmp = tempfile::tempdir()?;
            let list = SpillList::new(tmp.path(), capacity);

            thread::scope(|s| {
                for t in 0..4 {
                    let list = &list;
                    s.spawn(move || {
                        for i in 0..25 {
                            list.add(item(t * 25 + i)).unwrap();
                        }
                    });
                }
            });

            assert_eq!(100, list.len());
            let seen: HashSet<u32> = (0..100)
                .map(|i| list.get(i).map(|it| it.id))
                .collect::<Result<_, _>>()?;
            assert_eq!((0..100).collect::<HashSet<u32>>(), seen);
        }
        Ok(())
    }

    #[test]
    fn test_random_against_model() -> anyhow::Result<()> {
        let mut rng = rand::thread_rng();
        let (_dir, list) = mock_list(16);
        let mut model: Vec<Item> = Vec::new();

        for _ in 0..300 {
            match rng.gen_range(0..10) {
                0 => {
                    list.sort_by_key(|i| i.id)?;
                    model.sort_by_key(|i| i.id);
                }
                1..=6 => {
                    let it = item(rng.gen_range(0..50));
                    list.add(it.clone())?;
                    model.push(it);
                }
                _ => {
                    if !model.is_empty() {
                        let idx = rng.gen_range(0..model.len());
                        assert_eq!(model[idx], list.get(idx)?);
                    }
                }
            }
        }

        let all: Vec<Item> = (0..list.len()).map(|i| list.get(i)).collect::<Result<_, _>>()?;
        assert_eq!(model, all);
        Ok(())
    }

    #[test]
    fn test_reads_only_cold_entries() -> anyhow::Result<()> {
        let (dir, list) = mock_list(2);
        list.add_all([item(1), item(2), item(3)])?;
        dir.fs.lock().take_events();

        list.get(0)?;
        list.get(1)?;
        assert!(dir.fs.lock().take_events().is_empty());
        list.get(2)?;
        assert_eq!(
            vec![Event::Read("spill/2.json".into())],
            dir.fs.lock().take_events()
        );
        Ok(())
    }
}
