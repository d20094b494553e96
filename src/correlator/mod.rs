use moka::future::Cache;

/// Splits an echoed reply line into its correlation prefix (address digits
/// plus the two-letter mnemonic) and the payload, which may be empty.
/// Lines that do not match the shape are bus noise and are dropped.
pub fn parse_reply(line: &str) -> Option<(String, String)> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let mut mnemonic = line[digits..].chars();
    if !mnemonic.next()?.is_ascii_uppercase() || !mnemonic.next()?.is_ascii_uppercase() {
        return None;
    }
    let split = digits + 2;
    Some((line[..split].to_string(), line[split..].to_string()))
}

/// Latest-payload-per-prefix table resolving pending queries. A stale entry
/// must never satisfy a query issued after it, so the channel invalidates
/// the prefix before every fresh send.
pub struct ReplyCorrelator {
    table: Cache<String, String>,
}

impl ReplyCorrelator {
    pub fn new(capacity: u64) -> Self {
        Self {
            table: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub async fn ingest<I>(&self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        for line in lines {
            if let Some((prefix, payload)) = parse_reply(&line) {
                self.table.insert(prefix, payload).await;
            }
        }
    }

    pub async fn invalidate(&self, prefix: &str) {
        self.table.invalidate(prefix).await;
    }

    pub async fn lookup(&self, prefix: &str) -> Option<String> {
        self.table.get(prefix).await
    }
}
