//! Lua scripts implementing the atomic queue primitives.
//!
//! Every script receives the key prefix as `ARGV[1]` and the current time
//! in milliseconds as `ARGV[2]`, and builds keys the same way as
//! [`crate::keys::QueueKeys`]. Jobs are passed as a field count followed by
//! `field, value` pairs.

use std::sync::LazyLock;

use redis::Script;

/// Shared helpers prepended to every multi-key script.
const HELPERS: &str = r#"
local prefix = ARGV[1]
local now = tonumber(ARGV[2])

local function num(x)
  return string.format('%.0f', x)
end

local function jobKey(id)
  return prefix .. ':job:' .. id
end

local function queueKey(queue, kind)
  return prefix .. ':q:' .. queue .. ':' .. kind
end

local function pushWait(id)
  local key = jobKey(id)
  local queue = redis.call('HGET', key, 'queue')
  local priority = tonumber(redis.call('HGET', key, 'priority') or '0') or 0
  local seq = redis.call('INCR', prefix .. ':seq')
  redis.call('HSET', key, 'state', 'waiting')
  redis.call('HDEL', key, 'runAt')
  redis.call('ZADD', queueKey(queue, 'wait'), num(priority * 4294967296 + seq), id)
end

local function removeJob(id)
  local key = jobKey(id)
  local dedupe = redis.call('HGET', key, 'dedupe')
  if dedupe and redis.call('GET', dedupe) == id then
    redis.call('DEL', dedupe)
  end
  redis.call('DEL', key, key .. ':lock', key .. ':deps', key .. ':processed', key .. ':failed')
end

local function trim(queue, state, ageMs, count)
  local setKey = queueKey(queue, state)
  local old = redis.call('ZRANGEBYSCORE', setKey, '-inf', '(' .. num(now - ageMs))
  for _, id in ipairs(old) do
    removeJob(id)
    redis.call('ZREM', setKey, id)
  end
  local total = redis.call('ZCARD', setKey)
  if total > count then
    local extra = redis.call('ZRANGE', setKey, 0, total - count - 1)
    for _, id in ipairs(extra) do
      removeJob(id)
      redis.call('ZREM', setKey, id)
    end
  end
end

local function finishChild(childId, parentId, ok, value)
  local parentKey = jobKey(parentId)
  if ok then
    redis.call('HSET', parentKey .. ':processed', childId, value)
  else
    redis.call('HSET', parentKey .. ':failed', childId, value)
  end
  redis.call('SREM', parentKey .. ':deps', childId)
  if redis.call('SCARD', parentKey .. ':deps') == 0
      and redis.call('HGET', parentKey, 'state') == 'waiting-children' then
    local parentQueue = redis.call('HGET', parentKey, 'queue')
    redis.call('SREM', queueKey(parentQueue, 'waiting-children'), parentId)
    pushWait(parentId)
  end
end

local function failTerminal(id, reason)
  local key = jobKey(id)
  local queue = redis.call('HGET', key, 'queue')
  local ageMs = tonumber(redis.call('HGET', key, 'keepFailAge')) * 1000
  local count = tonumber(redis.call('HGET', key, 'keepFailCount'))
  local parentId = redis.call('HGET', key, 'parentId')
  redis.call('HSET', key, 'state', 'failed', 'failedReason', reason, 'finishedAt', num(now))
  redis.call('DEL', key .. ':lock')
  redis.call('ZADD', queueKey(queue, 'failed'), num(now), id)
  if parentId then
    finishChild(id, parentId, false, reason)
  end
  trim(queue, 'failed', ageMs, count)
end

local function readJob(pos)
  local fields = {}
  local args = {}
  local count = tonumber(ARGV[pos])
  for i = 1, count do
    local k = ARGV[pos + (i * 2) - 1]
    local v = ARGV[pos + (i * 2)]
    fields[k] = v
    args[#args + 1] = k
    args[#args + 1] = v
  end
  return fields, args, pos + (count * 2) + 1
end

local function createJob(fields, args)
  local id = fields['id']
  local key = jobKey(id)
  local queue = fields['queue']
  local state = fields['state']
  redis.call('HSET', key, unpack(args))
  if state == 'delayed' then
    redis.call('ZADD', queueKey(queue, 'delayed'), fields['runAt'], id)
  elseif state == 'waiting-children' then
    redis.call('SADD', queueKey(queue, 'waiting-children'), id)
  else
    pushWait(id)
  end
  if fields['dedupe'] then
    redis.call('SET', fields['dedupe'], id)
  end
end
"#;

/// Add one job unless its id is taken or its dedupe key is outstanding.
///
/// ARGV: prefix, now, job. Returns `{status, id}`.
const ADD_JOB: &str = r#"
local fields, args = readJob(3)
local id = fields['id']
if redis.call('EXISTS', jobKey(id)) == 1 then
  return {'duplicate', id}
end
local dedupe = fields['dedupe']
if dedupe then
  local existing = redis.call('GET', dedupe)
  if existing then
    local state = redis.call('HGET', jobKey(existing), 'state')
    if state and state ~= 'completed' and state ~= 'failed' then
      return {'duplicate', existing}
    end
  end
end
createJob(fields, args)
return {'created', id}
"#;

/// Add a parent in `waiting-children` plus its children.
///
/// Nothing is written when an id is taken or a dedupe key is held by an
/// outstanding job. ARGV: prefix, now, job count, parent, children...
/// Returns `{status, id}`.
const ADD_FLOW: &str = r#"
local total = tonumber(ARGV[3])
local jobs = {}
local seenDedupe = {}
local pos = 4
for i = 1, total do
  local fields, args, nextPos = readJob(pos)
  if redis.call('EXISTS', jobKey(fields['id'])) == 1 then
    return {'conflict', fields['id']}
  end
  local dedupe = fields['dedupe']
  if dedupe then
    if seenDedupe[dedupe] then
      return {'dedupe', fields['id']}
    end
    seenDedupe[dedupe] = true
    local existing = redis.call('GET', dedupe)
    if existing then
      local state = redis.call('HGET', jobKey(existing), 'state')
      if state and state ~= 'completed' and state ~= 'failed' then
        return {'dedupe', existing}
      end
    end
  end
  jobs[i] = {fields, args}
  pos = nextPos
end
local parentId = jobs[1][1]['id']
for i = 1, total do
  createJob(jobs[i][1], jobs[i][2])
  if i > 1 then
    redis.call('SADD', jobKey(parentId) .. ':deps', jobs[i][1]['id'])
  end
end
return {'created', parentId}
"#;

/// Promote due delayed jobs, then lease the next waiting job.
///
/// ARGV: prefix, now, queue, token, lock ms. Returns the job id or nil.
const CLAIM: &str = r#"
local queue = ARGV[3]
local delayedKey = queueKey(queue, 'delayed')
local due = redis.call('ZRANGEBYSCORE', delayedKey, '-inf', num(now))
for _, id in ipairs(due) do
  redis.call('ZREM', delayedKey, id)
  pushWait(id)
end
local waitKey = queueKey(queue, 'wait')
while true do
  local popped = redis.call('ZPOPMIN', waitKey)
  if #popped == 0 then
    return false
  end
  local id = popped[1]
  local key = jobKey(id)
  if redis.call('EXISTS', key) == 1 then
    redis.call('SADD', queueKey(queue, 'active'), id)
    redis.call('HSET', key, 'state', 'active')
    if redis.call('HEXISTS', key, 'startedAt') == 0 then
      redis.call('HSET', key, 'startedAt', num(now))
    end
    redis.call('SET', key .. ':lock', ARGV[4], 'PX', ARGV[5])
    return id
  end
end
"#;

/// Record a successful attempt.
///
/// ARGV: prefix, now, id, token, result. Returns `ok` or `lost-lock`.
const COMPLETE: &str = r#"
local id = ARGV[3]
local key = jobKey(id)
if redis.call('GET', key .. ':lock') ~= ARGV[4] then
  return 'lost-lock'
end
redis.call('DEL', key .. ':lock')
local queue = redis.call('HGET', key, 'queue')
local ageMs = tonumber(redis.call('HGET', key, 'keepCompleteAge')) * 1000
local count = tonumber(redis.call('HGET', key, 'keepCompleteCount'))
local parentId = redis.call('HGET', key, 'parentId')
redis.call('SREM', queueKey(queue, 'active'), id)
redis.call('HINCRBY', key, 'attemptsMade', 1)
redis.call('HSET', key, 'state', 'completed', 'returnvalue', ARGV[5], 'finishedAt', num(now))
redis.call('ZADD', queueKey(queue, 'completed'), num(now), id)
if parentId then
  finishChild(id, parentId, true, ARGV[5])
end
trim(queue, 'completed', ageMs, count)
return 'ok'
"#;

/// Record a failed attempt and retry or fail terminally.
///
/// ARGV: prefix, now, id, token, reason, retry delay ms (`-1` for none).
/// Returns the new state or `lost-lock`.
const FAIL: &str = r#"
local id = ARGV[3]
local key = jobKey(id)
if redis.call('GET', key .. ':lock') ~= ARGV[4] then
  return 'lost-lock'
end
redis.call('DEL', key .. ':lock')
local queue = redis.call('HGET', key, 'queue')
redis.call('SREM', queueKey(queue, 'active'), id)
local attempts = redis.call('HINCRBY', key, 'attemptsMade', 1)
local maxAttempts = tonumber(redis.call('HGET', key, 'maxAttempts'))
local delay = tonumber(ARGV[6])
redis.call('HSET', key, 'failedReason', ARGV[5])
if delay >= 0 and attempts < maxAttempts then
  if delay == 0 then
    pushWait(id)
    return 'waiting'
  end
  redis.call('HSET', key, 'state', 'delayed', 'runAt', num(now + delay))
  redis.call('ZADD', queueKey(queue, 'delayed'), num(now + delay), id)
  return 'delayed'
end
failTerminal(id, ARGV[5])
return 'failed'
"#;

/// Requeue or fail active jobs whose lease key expired.
///
/// ARGV: prefix, now, queue, max stalled count, reason.
/// Returns a flat list of `id, outcome` pairs.
const RECOVER_STALLED: &str = r#"
local queue = ARGV[3]
local maxStalled = tonumber(ARGV[4])
local activeKey = queueKey(queue, 'active')
local result = {}
for _, id in ipairs(redis.call('SMEMBERS', activeKey)) do
  local key = jobKey(id)
  if redis.call('EXISTS', key .. ':lock') == 0 then
    redis.call('SREM', activeKey, id)
    if redis.call('EXISTS', key) == 1 then
      local stalled = redis.call('HINCRBY', key, 'stalledCount', 1)
      if stalled > maxStalled then
        failTerminal(id, ARGV[5])
        result[#result + 1] = id
        result[#result + 1] = 'failed'
      else
        pushWait(id)
        result[#result + 1] = id
        result[#result + 1] = 'requeued'
      end
    end
  end
end
return result
"#;

/// Remove finished jobs older than a cutoff, keeping the newest N.
///
/// ARGV: prefix, now, queue, state, older-than ms, keep. Returns the count.
const CLEAN: &str = r#"
local setKey = queueKey(ARGV[3], ARGV[4])
local keep = tonumber(ARGV[6])
local total = redis.call('ZCARD', setKey)
if total <= keep then
  return 0
end
local cutoff = now - tonumber(ARGV[5])
local doomed = redis.call('ZRANGEBYSCORE', setKey, '-inf', '(' .. num(cutoff), 'LIMIT', 0, total - keep)
for _, id in ipairs(doomed) do
  removeJob(id)
  redis.call('ZREM', setKey, id)
end
return #doomed
"#;

/// Renew a lease if the token still owns it.
///
/// KEYS: lock key. ARGV: token, lock ms. Returns 1 or 0.
const EXTEND_LOCK: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

/// Overwrite progress on an existing job.
///
/// KEYS: job key. ARGV: progress JSON. Returns 1 or 0.
const UPDATE_PROGRESS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('HSET', KEYS[1], 'progress', ARGV[1])
  return 1
end
return 0
"#;

fn with_helpers(body: &str) -> Script {
    Script::new(&format!("{HELPERS}\n{body}"))
}

/// See [`ADD_JOB`].
pub static ADD_JOB_SCRIPT: LazyLock<Script> = LazyLock::new(|| with_helpers(ADD_JOB));

/// See [`ADD_FLOW`].
pub static ADD_FLOW_SCRIPT: LazyLock<Script> = LazyLock::new(|| with_helpers(ADD_FLOW));

/// See [`CLAIM`].
pub static CLAIM_SCRIPT: LazyLock<Script> = LazyLock::new(|| with_helpers(CLAIM));

/// See [`COMPLETE`].
pub static COMPLETE_SCRIPT: LazyLock<Script> = LazyLock::new(|| with_helpers(COMPLETE));

/// See [`FAIL`].
pub static FAIL_SCRIPT: LazyLock<Script> = LazyLock::new(|| with_helpers(FAIL));

/// See [`RECOVER_STALLED`].
pub static RECOVER_STALLED_SCRIPT: LazyLock<Script> =
    LazyLock::new(|| with_helpers(RECOVER_STALLED));

/// See [`CLEAN`].
pub static CLEAN_SCRIPT: LazyLock<Script> = LazyLock::new(|| with_helpers(CLEAN));

/// See [`EXTEND_LOCK`].
pub static EXTEND_LOCK_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(EXTEND_LOCK));

/// See [`UPDATE_PROGRESS`].
pub static UPDATE_PROGRESS_SCRIPT: LazyLock<Script> =
    LazyLock::new(|| Script::new(UPDATE_PROGRESS));
