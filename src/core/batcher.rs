/// 依固定大小切分批次，最後一批可能較短；`batch_size` 為 0 時視為 1
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();

    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }

    batches
}
