//! Script evaluated in every fresh sandbox context before the analyzer.

use mb_security::CONSOLE_CALL_PATTERN;
use mb_security::SandboxPolicy;
use mb_security::TO_STRING_ASSIGN_PATTERN;

const SANDBOX_ENV: &str = r#"
(function () {
  'use strict';
  var root = globalThis;
  var TOKEN = __MB_TOKEN__;
  var PAGE_URL = __MB_PAGE_URL__;
  var BLOCKED_GLOBALS = __MB_BLOCKED_GLOBALS__;
  var BLOCKED_TAGS = __MB_BLOCKED_TAGS__;
  var PROBE_ASSIGN = new RegExp(__MB_PROBE_ASSIGN__);
  var PROBE_CONSOLE = new RegExp(__MB_PROBE_CONSOLE__);
  var shouldBlockMutation = typeof root.__mb_should_block_mutation === 'function'
    ? root.__mb_should_block_mutation
    : function () { return false; };
  var stringify = JSON.stringify;
  var PromiseCtor = Promise;
  var toSource = Function.prototype.toString;
  var hasOwn = Object.prototype.hasOwnProperty;
  var tagOf = Object.prototype.toString;

  function seal(owner, name, value) {
    Object.defineProperty(owner, name, {
      value: value,
      writable: false,
      configurable: false,
      enumerable: false
    });
  }

  function blocked(name) {
    return function () {
      throw new Error(name + ' blocked');
    };
  }

  root.window = root;
  root.self = root;

  BLOCKED_GLOBALS.forEach(function (name) {
    seal(root, name, blocked(name));
  });
  seal(root, 'open', blocked('window.open'));

  var navigatorShim = {};
  seal(navigatorShim, 'userAgent', 'MaPlayerSandbox');
  seal(navigatorShim, 'sendBeacon', blocked('navigator.sendBeacon'));
  seal(root, 'navigator', Object.freeze(navigatorShim));

  var locationShim = {};
  Object.defineProperty(locationShim, 'href', {
    get: function () { return PAGE_URL; },
    set: blocked('location.href'),
    enumerable: true,
    configurable: false
  });
  seal(locationShim, 'assign', blocked('location.assign'));
  seal(locationShim, 'replace', blocked('location.replace'));
  seal(locationShim, 'reload', blocked('location.reload'));
  seal(locationShim, 'toString', function () { return PAGE_URL; });
  seal(root, 'location', Object.freeze(locationShim));

  var activeSources = [];

  function sourceOf(fn) {
    try {
      return typeof fn === 'function' ? String(toSource.call(fn)) : '';
    } catch (_) {
      return '';
    }
  }

  function callContext() {
    var trace = '';
    try {
      trace = String(new Error().stack || '');
    } catch (_) {}
    return trace + '\n' + activeSources.join('\n');
  }

  function runTracked(fn, self, args) {
    activeSources.push(sourceOf(fn));
    try {
      return fn.apply(self, args);
    } finally {
      activeSources.pop();
    }
  }

  function makeElement(tag, guardName) {
    var attributes = {};
    var children = [];
    var target = guardName || tag;
    function allowed() {
      return !shouldBlockMutation(target, callContext());
    }
    return {
      tagName: tag.toUpperCase(),
      childNodes: children,
      setAttribute: function (name, value) {
        if (allowed()) {
          attributes[String(name)] = String(value);
        }
      },
      removeAttribute: function (name) {
        if (allowed()) {
          delete attributes[String(name)];
        }
      },
      getAttribute: function (name) {
        var key = String(name);
        return hasOwn.call(attributes, key) ? attributes[key] : null;
      },
      appendChild: function (child) {
        if (allowed()) {
          children.push(child);
        }
        return child;
      },
      insertBefore: function (child, reference) {
        if (allowed()) {
          var at = children.indexOf(reference);
          if (at < 0) {
            children.push(child);
          } else {
            children.splice(at, 0, child);
          }
        }
        return child;
      },
      removeChild: function (child) {
        if (allowed()) {
          var at = children.indexOf(child);
          if (at >= 0) {
            children.splice(at, 1);
          }
        }
        return child;
      }
    };
  }

  var documentShim = {};
  seal(documentShim, 'createElement', function (tagName) {
    var tag = String(tagName || '').toLowerCase();
    if (BLOCKED_TAGS.indexOf(tag) >= 0) {
      throw new Error('blocked element ' + tag);
    }
    return makeElement(tag);
  });
  seal(documentShim, 'documentElement', Object.freeze(makeElement('html', 'documentElement')));
  seal(documentShim, 'body', Object.freeze(makeElement('body', 'body')));
  seal(root, 'document', Object.freeze(documentShim));

  function isProbeHandler(handler) {
    var source = '';
    try {
      source = typeof handler === 'function' ? toSource.call(handler) : String(handler || '');
    } catch (_) {
      return false;
    }
    return !!source && PROBE_ASSIGN.test(source) && PROBE_CONSOLE.test(source);
  }

  var timers = [];
  var cancelled = {};
  var nextTimer = 1;

  function schedule(handler, args) {
    if (isProbeHandler(handler) || typeof handler !== 'function') {
      return 0;
    }
    var id = nextTimer++;
    timers.push({ id: id, cb: handler, args: args });
    return id;
  }

  function cancel(id) {
    cancelled[String(id)] = true;
  }

  seal(root, 'setTimeout', function (handler) {
    return schedule(handler, Array.prototype.slice.call(arguments, 2));
  });
  seal(root, 'setInterval', function (handler) {
    return schedule(handler, Array.prototype.slice.call(arguments, 2));
  });
  seal(root, 'clearTimeout', cancel);
  seal(root, 'clearInterval', cancel);
  seal(root, 'queueMicrotask', function (callback) {
    if (typeof callback === 'function') {
      PromiseCtor.resolve().then(function () { callback(); });
    }
  });

  seal(root, '__mb_flush_timers', function (limit) {
    var runs = 0;
    while (timers.length > 0 && runs < limit) {
      var task = timers.shift();
      var key = String(task.id);
      var skip = hasOwn.call(cancelled, key);
      delete cancelled[key];
      if (!skip) {
        try {
          runTracked(task.cb, root, task.args);
        } catch (_) {}
      }
      runs++;
    }
    return runs;
  });

  function sanitizeConsoleArg(arg) {
    if (!arg || (typeof arg !== 'object' && typeof arg !== 'function')) {
      return String(arg);
    }
    try {
      if (hasOwn.call(arg, 'toString') && typeof arg.toString === 'function') {
        return '[ma-player-console-guard ' + tagOf.call(arg) + ']';
      }
      return tagOf.call(arg);
    } catch (_) {
      return '[ma-player-console-guard]';
    }
  }

  var consoleLines = [];
  var consoleShim = {};
  ['log', 'debug', 'dir', 'info', 'warn', 'error'].forEach(function (level) {
    seal(consoleShim, level, function () {
      var parts = Array.prototype.map.call(arguments, sanitizeConsoleArg);
      if (consoleLines.length < 64) {
        consoleLines.push(level + ': ' + parts.join(' '));
      }
    });
  });
  seal(root, 'console', Object.freeze(consoleShim));
  seal(root, 'alert', function () {});

  seal(root, '__mb_take_console', function () {
    var out = consoleLines.join('\n');
    consoleLines.length = 0;
    return out;
  });

  var reply = '';
  var started = false;

  function describe(error) {
    if (error && error.message) {
      return String(error.message);
    }
    return String(error || 'remote analyzer failed');
  }

  function settle(message) {
    if (reply) {
      return;
    }
    try {
      reply = stringify(message);
    } catch (error) {
      reply = stringify({
        type: 'remote-result',
        token: TOKEN,
        ok: false,
        error: 'remote analyzer result is not serializable: ' + describe(error)
      });
    }
  }

  seal(root, '__mb_run_analyze', function (snapshot) {
    if (started) {
      return;
    }
    started = true;
    try {
      var analyzer = root.MaPlayerRemoteAnalyzer;
      if (!analyzer || typeof analyzer.analyze !== 'function') {
        throw new Error('MaPlayerRemoteAnalyzer.analyze is missing.');
      }
      PromiseCtor.resolve(runTracked(analyzer.analyze, analyzer, [snapshot])).then(
        function (result) {
          settle({ type: 'remote-result', token: TOKEN, ok: true, result: result });
        },
        function (error) {
          settle({ type: 'remote-result', token: TOKEN, ok: false, error: describe(error) });
        }
      );
    } catch (error) {
      settle({ type: 'remote-result', token: TOKEN, ok: false, error: describe(error) });
    }
  });

  seal(root, '__mb_take_reply', function () {
    var out = reply;
    reply = '';
    return out;
  });
})();
"#;

/// Renders the sandbox bootstrap for one session.
pub fn render_bootstrap(policy: &SandboxPolicy, token: &str, page_url: &str) -> String {
    fill_placeholders(
        SANDBOX_ENV,
        &[
            ("__MB_TOKEN__", js_string_literal(token)),
            ("__MB_PAGE_URL__", js_string_literal(page_url)),
            ("__MB_BLOCKED_GLOBALS__", js_string_array(&policy.blocked_globals)),
            ("__MB_BLOCKED_TAGS__", js_string_array(&policy.blocked_element_tags)),
            ("__MB_PROBE_ASSIGN__", js_string_literal(TO_STRING_ASSIGN_PATTERN)),
            ("__MB_PROBE_CONSOLE__", js_string_literal(CONSOLE_CALL_PATTERN)),
        ],
    )
}

/// Substitutes placeholders in one left-to-right pass; inserted values are
/// never scanned again.
fn fill_placeholders(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let next = values
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|at| (at, *key, value)))
            .min_by_key(|(at, _, _)| *at);
        let Some((at, key, value)) = next else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..at]);
        out.push_str(value);
        rest = &rest[at + key.len()..];
    }
}

/// JSON string syntax is a valid ECMAScript string literal.
pub fn js_string_literal(input: &str) -> String {
    serde_json::Value::from(input).to_string()
}

fn js_string_array(items: &[String]) -> String {
    serde_json::Value::from(items.to_vec()).to_string()
}
