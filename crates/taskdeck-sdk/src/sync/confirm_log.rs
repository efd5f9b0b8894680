//! 新建确认日志
//!
//! 整体替换列表的操作（加载、快照回滚）在远端调用期间看不到其他新建的确认结果。
//! 这类操作开始时打开一个窗口，结束时用窗口内记录的确认把这些新建记录补回去。
//! 没有打开的窗口时不保留任何条目。

use parking_lot::Mutex;

/// 一次确认：临时 ID 被服务端记录替换
#[derive(Debug, Clone)]
pub struct Confirmation<T> {
    pub temp_id: String,
    pub record: T,
}

struct LogState<T> {
    seq: u64,
    open_windows: usize,
    entries: Vec<(u64, Confirmation<T>)>,
}

pub struct ConfirmLog<T> {
    state: Mutex<LogState<T>>,
}

impl<T: Clone> Default for ConfirmLog<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(LogState {
                seq: 0,
                open_windows: 0,
                entries: Vec::new(),
            }),
        }
    }
}

impl<T: Clone> ConfirmLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 打开窗口，之后记录的确认都能从窗口里取到
    pub fn open(&self) -> LogWindow<'_, T> {
        let mut state = self.state.lock();
        state.open_windows += 1;
        LogWindow {
            log: self,
            mark: state.seq,
        }
    }

    pub fn record(&self, temp_id: &str, record: T) {
        let mut state = self.state.lock();
        state.seq += 1;
        if state.open_windows > 0 {
            let seq = state.seq;
            state.entries.push((
                seq,
                Confirmation {
                    temp_id: temp_id.to_string(),
                    record,
                },
            ));
        }
    }

    /// 保留中的条目数
    pub fn retained(&self) -> usize {
        self.state.lock().entries.len()
    }
}

/// 日志窗口，drop 时关闭；最后一个窗口关闭时清空条目
pub struct LogWindow<'a, T: Clone> {
    log: &'a ConfirmLog<T>,
    mark: u64,
}

impl<T: Clone> LogWindow<'_, T> {
    /// 窗口打开之后记录的确认，按发生顺序
    pub fn since_open(&self) -> Vec<Confirmation<T>> {
        self.log
            .state
            .lock()
            .entries
            .iter()
            .filter(|(seq, _)| *seq > self.mark)
            .map(|(_, confirmation)| confirmation.clone())
            .collect()
    }
}

impl<T: Clone> Drop for LogWindow<'_, T> {
    fn drop(&mut self) {
        let mut state = self.log.state.lock();
        state.open_windows = state.open_windows.saturating_sub(1);
        if state.open_windows == 0 {
            state.entries.clear();
        }
    }
}
