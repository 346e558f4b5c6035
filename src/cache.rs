//! 编译产物与计算值的进程级缓存池。
//!
//! 表锁只保护键到槽位的映射，每个键有自己的槽位。构造函数在表锁之外、
//! 持有槽位的构造权时执行，并发的首次访问在槽位上等待，因此同一个键最多只构造一次，
//! 不同的键可以同时构造。构造函数内再次请求同一个键会得到
//! [`Exception::CacheReentry`]。构造失败不会留下任何条目。

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use log::{debug, warn};
use lru::LruCache;
use regex::Regex;

use crate::exception::Exception;

/// 缓存键。按标签区分形状，失效操作按形状匹配。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// 字符串键，可被正则失效
    Name(String),
    /// 数组键，可被前缀失效
    Path(Vec<String>),
    /// 未显式给出键时使用调用位置
    Location { file: String, line: u32 },
}

impl CacheKey {
    pub fn name(name: &str) -> Self {
        CacheKey::Name(name.to_string())
    }

    pub fn path(segments: &[&str]) -> Self {
        CacheKey::Path(segments.iter().map(|s| s.to_string()).collect())
    }

    /// 以调用者的源码位置作为键
    #[track_caller]
    pub fn here() -> Self {
        let location = std::panic::Location::caller();
        CacheKey::Location {
            file: location.file().to_string(),
            line: location.line(),
        }
    }

    pub fn starts_with(&self, prefix: &[String]) -> bool {
        match self {
            CacheKey::Path(segments) => {
                segments.len() >= prefix.len() && segments[..prefix.len()] == *prefix
            }
            _ => false,
        }
    }

    pub fn is_match(&self, pattern: &Regex) -> bool {
        match self {
            CacheKey::Name(name) => pattern.is_match(name),
            _ => false,
        }
    }
}

impl From<&str> for CacheKey {
    fn from(name: &str) -> Self {
        CacheKey::name(name)
    }
}

impl From<Vec<&str>> for CacheKey {
    fn from(segments: Vec<&str>) -> Self {
        CacheKey::path(&segments)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Name(name) => write!(f, "{}", name),
            CacheKey::Path(segments) => write!(f, "[{}]", segments.join(", ")),
            CacheKey::Location { file, line } => write!(f, "{}:{}", file, line),
        }
    }
}

/// 编译产物的复合键：逻辑缓存 id、引擎、构造参数与内联源码。
/// 相等性按全部字段的结构比较。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    id: CacheKey,
    engine: String,
    args: Vec<String>,
    block: Option<String>,
}

impl ArtifactKey {
    pub fn new(id: CacheKey, engine: &str, args: Vec<String>, block: Option<String>) -> Self {
        Self {
            id,
            engine: engine.to_string(),
            args,
            block,
        }
    }
}

/// 失效操作通过该 trait 取得键中的逻辑 id
pub trait Keyed: Clone + Eq + Hash + Send + 'static {
    fn cache_key(&self) -> &CacheKey;
}

impl Keyed for CacheKey {
    fn cache_key(&self) -> &CacheKey {
        self
    }
}

impl Keyed for ArtifactKey {
    fn cache_key(&self) -> &CacheKey {
        &self.id
    }
}

pub type Constructor<'a, V> = &'a mut dyn FnMut() -> Result<V, Exception>;

/// 可注入的缓存能力。
pub trait Pool<K: Keyed, V: Clone>: Send + Sync {
    /// 命中则返回已有实例，否则构造并保存。同一个键并发首次访问时只构造一次。
    fn get_or_create(&self, key: &K, make: Constructor<'_, V>) -> Result<V, Exception>;

    fn invalidate_all(&self);

    /// 删除所有满足谓词的键，返回删除数量
    fn invalidate_if(&self, predicate: &dyn Fn(&K) -> bool) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn invalidate_exact(&self, id: &CacheKey) -> usize {
        self.invalidate_if(&|k: &K| k.cache_key() == id)
    }

    /// 只删除长度不小于前缀且逐段相等的数组键
    fn invalidate_prefix(&self, prefix: &[String]) -> usize {
        self.invalidate_if(&|k: &K| k.cache_key().starts_with(prefix))
    }

    fn invalidate_matching(&self, pattern: &Regex) -> usize {
        self.invalidate_if(&|k: &K| k.cache_key().is_match(pattern))
    }
}

pub type SharedPool<K, V> = Arc<dyn Pool<K, V>>;

enum SlotState<V> {
    Empty,
    Building(ThreadId),
    Ready(V),
}

/// 单个键的槽位
struct Slot<V> {
    state: Mutex<SlotState<V>>,
    ready: Condvar,
}

impl<V: Clone> Slot<V> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Empty),
            ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<V>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("缓存槽位锁被污染，继续使用其中的数据");
                poisoned.into_inner()
            }
        }
    }

    fn is_ready(&self) -> bool {
        matches!(*self.lock(), SlotState::Ready(_))
    }

    fn is_vacant(&self) -> bool {
        matches!(*self.lock(), SlotState::Empty)
    }

    fn settle(&self, state: SlotState<V>) {
        *self.lock() = state;
        self.ready.notify_all();
    }

    /// 已有值直接返回；其他线程正在构造时等待；否则取得构造权并在槽位锁之外构造
    fn fill(&self, key: &CacheKey, make: Constructor<'_, V>) -> Result<V, Exception> {
        let me = thread::current().id();
        let mut state = self.lock();
        loop {
            let waiting = match &*state {
                SlotState::Ready(value) => return Ok(value.clone()),
                SlotState::Building(owner) if *owner == me => {
                    warn!("缓存条目{}在构造过程中被再次请求", key);
                    return Err(Exception::CacheReentry(key.to_string()));
                }
                SlotState::Building(_) => true,
                SlotState::Empty => false,
            };
            if !waiting {
                break;
            }
            state = match self.ready.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("缓存槽位锁被污染，继续使用其中的数据");
                    poisoned.into_inner()
                }
            };
        }
        *state = SlotState::Building(me);
        drop(state);

        let mut guard = BuildGuard { slot: self, armed: true };
        let result = make();
        guard.armed = false;
        match &result {
            Ok(value) => {
                debug!("缓存池新建条目：{}", key);
                self.settle(SlotState::Ready(value.clone()));
            }
            Err(_) => self.settle(SlotState::Empty),
        }
        result
    }
}

// 构造函数 panic 时释放构造权，等待者不会永远阻塞
struct BuildGuard<'a, V: Clone> {
    slot: &'a Slot<V>,
    armed: bool,
}

impl<V: Clone> Drop for BuildGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.settle(SlotState::Empty);
        }
    }
}

/// 不限容量的内存池
pub struct MemoryPool<K, V> {
    entries: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K: Keyed, V: Clone + Send> MemoryPool<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Arc<Slot<V>>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("内存缓存池锁被污染，继续使用其中的数据");
                poisoned.into_inner()
            }
        }
    }
}

impl<K: Keyed, V: Clone + Send> Default for MemoryPool<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Keyed, V: Clone + Send + 'static> Pool<K, V> for MemoryPool<K, V> {
    fn get_or_create(&self, key: &K, make: Constructor<'_, V>) -> Result<V, Exception> {
        let slot = Arc::clone(self.lock().entry(key.clone()).or_insert_with(Slot::new));
        let result = slot.fill(key.cache_key(), make);
        if result.is_err() {
            let mut entries = self.lock();
            let stale = entries
                .get(key)
                .map_or(false, |current| Arc::ptr_eq(current, &slot) && slot.is_vacant());
            if stale {
                entries.remove(key);
            }
        }
        result
    }

    fn invalidate_all(&self) {
        self.lock().clear();
    }

    fn invalidate_if(&self, predicate: &dyn Fn(&K) -> bool) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, _| !predicate(k));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.is_ready()).count()
    }
}

/// 定容的 LRU 池，超出容量时淘汰最久未使用的条目
pub struct LruPool<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Arc<Slot<V>>>>,
}

impl<K: Keyed, V: Clone + Send> LruPool<K, V> {
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = match NonZeroUsize::new(capacity) {
            Some(c) => c,
            None => {
                warn!("LRU缓存池容量被指定为0，改为1");
                NonZeroUsize::MIN
            }
        };
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Arc<Slot<V>>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("LRU缓存池锁被污染，继续使用其中的数据");
                poisoned.into_inner()
            }
        }
    }
}

impl<K: Keyed, V: Clone + Send + 'static> Pool<K, V> for LruPool<K, V> {
    fn get_or_create(&self, key: &K, make: Constructor<'_, V>) -> Result<V, Exception> {
        let slot = Arc::clone(self.lock().get_or_insert(key.clone(), Slot::new));
        let result = slot.fill(key.cache_key(), make);
        if result.is_err() {
            let mut entries = self.lock();
            let stale = entries
                .peek(key)
                .map_or(false, |current| Arc::ptr_eq(current, &slot) && slot.is_vacant());
            if stale {
                entries.pop(key);
            }
        }
        result
    }

    fn invalidate_all(&self) {
        self.lock().clear();
    }

    fn invalidate_if(&self, predicate: &dyn Fn(&K) -> bool) -> usize {
        let mut entries = self.lock();
        let doomed: Vec<K> = entries
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    fn len(&self) -> usize {
        self.lock().iter().filter(|(_, slot)| slot.is_ready()).count()
    }
}

/// 0 表示不限容量的内存池，其余值表示 LRU 池的容量
pub fn pool_with_capacity<K, V>(size: usize) -> SharedPool<K, V>
where
    K: Keyed,
    V: Clone + Send + 'static,
{
    if size == 0 {
        Arc::new(MemoryPool::new())
    } else {
        Arc::new(LruPool::from_capacity(size))
    }
}

/// 键可选的取值：没有键时绕过缓存，每次都重新构造
pub fn fetch_or_build<K, V>(
    pool: &dyn Pool<K, V>,
    key: Option<&K>,
    make: Constructor<'_, V>,
) -> Result<V, Exception>
where
    K: Keyed,
    V: Clone,
{
    match key {
        Some(key) => pool.get_or_create(key, make),
        None => make(),
    }
}
